// Per-device register storage.

pub mod registers;

pub use registers::{Register, RegisterStore};
