//! # Stateless Codec Layer
//!
//! Pure encoding/decoding algorithms shared by the cursor. Nothing in this
//! module touches the log or allocates on the encode path.
//!
//! - `stopbit`: variable-length signed integers (7 payload bits per byte)
//! - `utf8`: modified UTF-8 text with length-bounded and delimited reads
//! - `float`: decimal-exact double reconstruction helpers

pub mod float;
pub mod stopbit;
pub mod utf8;
