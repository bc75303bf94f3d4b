//! Domain types shared by every layer: the static service catalog model,
//! operation results, the machine token, the response envelope, and the
//! error taxonomy.

pub mod errors;
pub mod models;
