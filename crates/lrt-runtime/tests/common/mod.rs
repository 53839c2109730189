//! Shared fixtures for the integration tests: host-engine graphs and log
//! capture.

#![allow(dead_code)]

use std::sync::Arc;

use lrt_engine::{HostEngine, HostGraph, HostSignature, HostTensor, TensorSpec};
use lrt_tensor::ElementType;

/// Mel frames the `tts` graph emits per input token.
pub const FRAMES_PER_TOKEN: i32 = 7;
pub const MEL_BINS: i32 = 80;

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// `y = 2 * x` over a `[1, 4]` float tensor.
pub fn scale_graph() -> HostGraph {
    HostGraph::new().with_signature(HostSignature::new(
        "serving_default",
        vec![TensorSpec::new("x", ElementType::Float32, &[1, 4])],
        vec![TensorSpec::new("y", ElementType::Float32, &[1, 4])],
        |inputs| {
            let doubled: Vec<f32> = inputs[0].to_f32().iter().map(|v| v * 2.0).collect();
            Ok(vec![HostTensor::from_f32(&[1, 4], &doubled)])
        },
    ))
}

/// Token ids in, mel frames out. Before a run the graph reports one frame
/// per token, which undercounts the real output by `FRAMES_PER_TOKEN`.
pub fn tts_graph() -> HostGraph {
    HostGraph::new().with_signature(
        HostSignature::new(
            "synthesize",
            vec![TensorSpec::new("tokens", ElementType::Int32, &[1, -1])],
            vec![TensorSpec::new("mel", ElementType::Float32, &[1, -1, MEL_BINS])],
            |inputs| {
                let frames = inputs[0].dims[1] * FRAMES_PER_TOKEN;
                let values = vec![0.5f32; (frames * MEL_BINS) as usize];
                Ok(vec![HostTensor::from_f32(&[1, frames, MEL_BINS], &values)])
            },
        )
        .with_output_shapes(|ins| vec![vec![1, ins[0][1], MEL_BINS]]),
    )
}

pub fn engine() -> Arc<HostEngine> {
    init_tracing();
    Arc::new(
        HostEngine::new()
            .with_model("scale", scale_graph())
            .with_model("tts", tts_graph()),
    )
}

pub fn token_bytes(tokens: &[i32]) -> Vec<u8> {
    tokens.iter().flat_map(|t| t.to_le_bytes()).collect()
}
