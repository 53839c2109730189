//! Integration tests: input resizing and outputs whose length is only known
//! after inference, as produced by duration-predicting speech models.

mod common;

use common::{token_bytes, FRAMES_PER_TOKEN, MEL_BINS};
use lrt_engine::ResourceKind;
use lrt_runtime::{
    CompiledModel, DynamicSizeEstimator, Environment, Error, Layout, Model, OptionSet,
    ResizeMode, Status, TensorBuffer, TensorError, TensorSlot,
};

#[test]
fn test_estimated_output_holds_expanded_sequence() {
    let engine = common::engine();
    let mut env = Environment::new(engine.clone()).unwrap();
    {
        let mut model = Model::from_buffer(&env, b"tts".to_vec()).unwrap();
        let mut options = OptionSet::new(&env).unwrap();
        {
            let mut compiled = CompiledModel::new(&env, &model, &options).unwrap();
            let tokens = [3, 14, 15, 92, 65, 35, 89, 79, 32, 38];
            compiled
                .resize_input(0, 0, &[1, tokens.len() as i32], ResizeMode::Strict)
                .unwrap();
            let layout = compiled.input_layout(0, 0).unwrap();
            assert_eq!(layout.dims(), &[1, 10]);

            let mut input =
                TensorBuffer::for_layout(&compiled, 0, TensorSlot::Input(0), &layout, 0).unwrap();
            input.write_bytes(&token_bytes(&tokens)).unwrap();

            // Before the run the model reports one frame per token.
            let provisional = compiled.output_layouts(0, true).unwrap();
            assert_eq!(provisional[0].dims(), &[1, 10, MEL_BINS]);

            let estimator = DynamicSizeEstimator::for_sequence(tokens.len(), FRAMES_PER_TOKEN as u64);
            let mut output = TensorBuffer::for_dynamic_output(&compiled, 0, 0, &estimator).unwrap();
            let frames = tokens.len() * FRAMES_PER_TOKEN as usize;
            assert_eq!(output.size().unwrap(), frames * MEL_BINS as usize * 4);

            compiled.run(0, &[&input], &[&output]).unwrap();
            let observed = compiled.output_layouts(0, false).unwrap();
            assert_eq!(observed[0].dims(), &[1, frames as i32, MEL_BINS]);
            let mel = output.read_f32().unwrap();
            assert!(mel.iter().all(|&v| v == 0.5));

            // A shorter utterance reuses the buffer; the rest is zero padding.
            compiled
                .resize_input(0, 0, &[1, 4], ResizeMode::Strict)
                .unwrap();
            input.write_bytes(&token_bytes(&[1, 2, 3, 4, 0, 0, 0, 0, 0, 0])).unwrap();
            compiled.run(0, &[&input], &[&output]).unwrap();
            let mel = output.read_f32().unwrap();
            let used = 4 * FRAMES_PER_TOKEN as usize * MEL_BINS as usize;
            assert!(mel[..used].iter().all(|&v| v == 0.5));
            assert!(mel[used..].iter().all(|&v| v == 0.0));

            input.destroy();
            output.destroy();
            compiled.destroy();
        }
        options.destroy();
        model.destroy();
    }
    env.destroy();
    assert!(engine.stats().is_clean(), "{:?}", engine.stats());
}

#[test]
fn test_frame_bound_beyond_layout_range_is_refused() {
    let engine = common::engine();
    let mut env = Environment::new(engine.clone()).unwrap();
    {
        let mut model = Model::from_buffer(&env, b"tts".to_vec()).unwrap();
        let mut options = OptionSet::new(&env).unwrap();
        {
            let mut compiled = CompiledModel::new(&env, &model, &options).unwrap();
            compiled
                .resize_input(0, 0, &[1, 10], ResizeMode::Strict)
                .unwrap();
            let estimator = DynamicSizeEstimator::new(i32::MAX as u64 + 1);
            let err = TensorBuffer::for_dynamic_output(&compiled, 0, 0, &estimator).unwrap_err();
            match err {
                Error::Tensor(TensorError::Overflow(dims)) => {
                    assert_eq!(dims, vec![1, i32::MAX as i64 + 1, MEL_BINS as i64]);
                }
                other => panic!("unexpected error: {other:?}"),
            }
            assert_eq!(engine.stats().created(ResourceKind::TensorBuffer), 0);
            compiled.destroy();
        }
        options.destroy();
        model.destroy();
    }
    env.destroy();
    assert!(engine.stats().is_clean());
}

#[test]
fn test_buffer_sized_from_provisional_layout_is_too_small() {
    let engine = common::engine();
    let mut env = Environment::new(engine.clone()).unwrap();
    {
        let mut model = Model::from_buffer(&env, b"tts".to_vec()).unwrap();
        let mut options = OptionSet::new(&env).unwrap();
        {
            let mut compiled = CompiledModel::new(&env, &model, &options).unwrap();
            compiled
                .resize_input(0, 0, &[1, 10], ResizeMode::Strict)
                .unwrap();
            let input_layout = compiled.input_layout(0, 0).unwrap();
            let mut input =
                TensorBuffer::for_layout(&compiled, 0, TensorSlot::Input(0), &input_layout, 0)
                    .unwrap();
            let reported = compiled.output_layouts(0, true).unwrap().remove(0);
            let mut output =
                TensorBuffer::for_layout(&compiled, 0, TensorSlot::Output(0), &reported, 0)
                    .unwrap();
            assert_eq!(output.size().unwrap(), 10 * MEL_BINS as usize * 4);

            let err = compiled.run(0, &[&input], &[&output]).unwrap_err();
            assert_eq!(err.status(), Status::ErrorRuntimeFailure);
            assert!(compiled
                .error_messages()
                .unwrap()
                .contains(&format!("needs {} bytes", 70 * MEL_BINS * 4)));

            input.destroy();
            output.destroy();
            compiled.destroy();
        }
        options.destroy();
        model.destroy();
    }
    env.destroy();
    assert!(engine.stats().is_clean());
}

#[test]
fn test_strict_resize_keeps_static_dims() {
    let engine = common::engine();
    let mut env = Environment::new(engine.clone()).unwrap();
    {
        let mut model = Model::from_buffer(&env, b"tts".to_vec()).unwrap();
        let mut options = OptionSet::new(&env).unwrap();
        {
            let mut compiled = CompiledModel::new(&env, &model, &options).unwrap();
            let err = compiled
                .resize_input(0, 0, &[2, 10], ResizeMode::Strict)
                .unwrap_err();
            assert_eq!(err.status(), Status::ErrorInvalidArgument);
            compiled
                .resize_input(0, 0, &[2, 10], ResizeMode::NonStrict)
                .unwrap();
            assert_eq!(compiled.input_layout(0, 0).unwrap(), Layout::from_slice(&[2, 10]).unwrap());

            let err = compiled
                .resize_input(0, 0, &[], ResizeMode::NonStrict)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
            compiled.destroy();
        }
        options.destroy();
        model.destroy();
    }
    env.destroy();
}

#[test]
fn test_minimum_size_raises_allocation() {
    let engine = common::engine();
    let mut env = Environment::new(engine.clone()).unwrap();
    {
        let mut model = Model::from_buffer(&env, b"scale".to_vec()).unwrap();
        let mut options = OptionSet::new(&env).unwrap();
        {
            let mut compiled = CompiledModel::new(&env, &model, &options).unwrap();
            let layout = Layout::from_slice(&[1, 4]).unwrap();
            let mut buffer =
                TensorBuffer::for_layout(&compiled, 0, TensorSlot::Output(0), &layout, 256)
                    .unwrap();
            assert_eq!(buffer.size().unwrap(), 256);
            assert_eq!(buffer.packed_size().unwrap(), 16);
            buffer.destroy();
            compiled.destroy();
        }
        options.destroy();
        model.destroy();
    }
    env.destroy();
    assert!(engine.stats().is_clean());
}
