//! Single request/response round-trip through the connection pool.
//!
//! Every VFS callback bottoms out in exactly one call to [`roundtrip`]: any
//! non-OK status returns the negated errno to the kernel; any transport
//! failure poisons the pool connection and returns ENOTCONN.

use crate::client::pool::Pool;
use crate::wire::{read_frame, write_frame, Request, Response};

/// Outcome of one opcode round-trip, already mapped to the kernel's negated
/// errno convention on failure.
pub enum Outcome {
    Ok(Response),
    Errno(i32),
}

pub async fn roundtrip(pool: &Pool, request: Request) -> Outcome {
    let opcode = request.opcode();
    let frame = request.encode();

    let mut lease = match pool.acquire().await {
        Ok(lease) => lease,
        Err(_) => return Outcome::Errno(libc::ENOTCONN),
    };

    if let Err(_err) = write_frame(lease.stream(), &frame).await {
        lease.poison();
        return Outcome::Errno(libc::ENOTCONN);
    }

    let (status, body) = match read_frame(lease.stream()).await {
        Ok(pair) => pair,
        Err(_err) => {
            lease.poison();
            return Outcome::Errno(libc::ENOTCONN);
        }
    };

    if status != 0 {
        lease.release();
        return Outcome::Errno(status as i32);
    }

    match Response::decode(opcode, &body) {
        Ok(response) => {
            lease.release();
            Outcome::Ok(response)
        }
        Err(_) => {
            // A successful status with an undecodable body is as good as a
            // broken transport: the peer and this client have lost sync on
            // the framing contract.
            lease.poison();
            Outcome::Errno(libc::ENOTCONN)
        }
    }
}
