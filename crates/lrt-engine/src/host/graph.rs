use std::fmt;
use std::sync::Arc;

use lrt_tensor::{packed_size_of, ElementType, Quantization};

use crate::status::Status;

/// Host-side tensor passed to and from a [`HostKernel`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub element_type: ElementType,
    pub dims: Vec<i32>,
    pub data: Vec<u8>,
}

impl HostTensor {
    pub fn new(element_type: ElementType, dims: Vec<i32>, data: Vec<u8>) -> Self {
        HostTensor {
            element_type,
            dims,
            data,
        }
    }

    pub fn from_f32(dims: &[i32], values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        HostTensor::new(ElementType::Float32, dims.to_vec(), data)
    }

    /// Zero-filled tensor of the packed size of `dims`.
    pub fn zeros(element_type: ElementType, dims: &[i32]) -> Result<Self, Status> {
        let len = packed_size_of(element_type, dims).map_err(|_| Status::ErrorInvalidArgument)?;
        Ok(HostTensor::new(element_type, dims.to_vec(), vec![0; len]))
    }

    /// Interpret the data as little-endian f32 values.
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Computes a signature's outputs from its inputs.
pub type HostKernel = Arc<dyn Fn(&[HostTensor]) -> Result<Vec<HostTensor>, Status> + Send + Sync>;

/// Predicts output dimensions from current input dimensions before a run.
pub type ShapeFn = Arc<dyn Fn(&[Vec<i32>]) -> Vec<Vec<i32>> + Send + Sync>;

/// Declared input or output of a signature. `-1` marks a dynamic dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub name: String,
    pub element_type: ElementType,
    pub dims: Vec<i32>,
    pub quantization: Quantization,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, element_type: ElementType, dims: &[i32]) -> Self {
        TensorSpec {
            name: name.into(),
            element_type,
            dims: dims.to_vec(),
            quantization: Quantization::None,
        }
    }

    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = quantization;
        self
    }

    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|&d| d < 0)
    }
}

#[derive(Clone)]
pub struct HostSignature {
    pub key: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    kernel: HostKernel,
    output_shapes: Option<ShapeFn>,
}

impl HostSignature {
    pub fn new<F>(key: impl Into<String>, inputs: Vec<TensorSpec>, outputs: Vec<TensorSpec>, kernel: F) -> Self
    where
        F: Fn(&[HostTensor]) -> Result<Vec<HostTensor>, Status> + Send + Sync + 'static,
    {
        HostSignature {
            key: key.into(),
            inputs,
            outputs,
            kernel: Arc::new(kernel),
            output_shapes: None,
        }
    }

    /// Install a pre-run shape estimate for the outputs. Without one the
    /// declared output dimensions are reported.
    pub fn with_output_shapes<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Vec<i32>]) -> Vec<Vec<i32>> + Send + Sync + 'static,
    {
        self.output_shapes = Some(Arc::new(f));
        self
    }

    pub(crate) fn provisional_outputs(&self, input_dims: &[Vec<i32>]) -> Vec<Vec<i32>> {
        match &self.output_shapes {
            Some(f) => f(input_dims),
            None => self.outputs.iter().map(|o| o.dims.clone()).collect(),
        }
    }

    pub(crate) fn execute(&self, inputs: &[HostTensor]) -> Result<Vec<HostTensor>, Status> {
        (self.kernel)(inputs)
    }
}

impl fmt::Debug for HostSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSignature")
            .field("key", &self.key)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("output_shapes", &self.output_shapes.is_some())
            .finish()
    }
}

/// A model the host engine can load: one or more signatures.
#[derive(Debug, Clone, Default)]
pub struct HostGraph {
    pub signatures: Vec<HostSignature>,
}

impl HostGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature(mut self, signature: HostSignature) -> Self {
        self.signatures.push(signature);
        self
    }

    pub fn signature(&self, index: usize) -> Option<&HostSignature> {
        self.signatures.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubler() -> HostSignature {
        HostSignature::new(
            "serving_default",
            vec![TensorSpec::new("x", ElementType::Float32, &[1, 4])],
            vec![TensorSpec::new("y", ElementType::Float32, &[1, 4])],
            |inputs| {
                let values: Vec<f32> = inputs[0].to_f32().iter().map(|v| v * 2.0).collect();
                Ok(vec![HostTensor::from_f32(&inputs[0].dims, &values)])
            },
        )
    }

    #[test]
    fn test_kernel_executes() {
        let sig = doubler();
        let out = sig
            .execute(&[HostTensor::from_f32(&[1, 4], &[1.0, 2.0, 3.0, 4.0])])
            .unwrap();
        assert_eq!(out[0].to_f32(), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_provisional_outputs_default_to_declared() {
        let sig = doubler();
        assert_eq!(sig.provisional_outputs(&[vec![1, 4]]), vec![vec![1, 4]]);

        let sig = sig.with_output_shapes(|ins| vec![vec![ins[0][0], ins[0][1] * 3]]);
        assert_eq!(sig.provisional_outputs(&[vec![1, 5]]), vec![vec![1, 15]]);
    }

    #[test]
    fn test_zeros_uses_packed_size() {
        let t = HostTensor::zeros(ElementType::Int4, &[1, 7]).unwrap();
        assert_eq!(t.data.len(), 4);
        assert_eq!(
            HostTensor::zeros(ElementType::TfString, &[1]),
            Err(Status::ErrorInvalidArgument)
        );
    }

    #[test]
    fn test_dynamic_spec() {
        assert!(TensorSpec::new("ids", ElementType::Int32, &[1, -1]).is_dynamic());
        assert!(!TensorSpec::new("ids", ElementType::Int32, &[1, 8]).is_dynamic());
    }
}
