//! ONNX protobuf types generated by `build.rs` from `onnx.proto`.

mod inner {
    include!(concat!(env!("OUT_DIR"), "/onnx-protos/mod.rs"));
}

pub use inner::onnx::*;
