//! I/O primitives shared by format readers

pub mod traits;
pub mod byte_order;

pub use traits::SeekableReader;
pub use byte_order::{ByteOrder, ByteOrderHandler};
