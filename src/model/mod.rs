pub mod external;
pub mod onnx;
pub mod shared;
pub mod summary;

#[cfg(test)]
pub(crate) mod fixtures;
