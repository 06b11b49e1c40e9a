mod range;
mod size;

pub use range::ByteRange;
pub use size::format_bytes;
