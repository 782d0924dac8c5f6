//! Route handlers. Guards run before these; a handler only ever sees a
//! principal that already passed its route's checks.

pub mod health;
pub mod movies;
pub mod users;
