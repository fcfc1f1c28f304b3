//! Signature backend: runs entry points described by their I/O signature.
//!
//! The entry point declares typed input signatures and how each output is
//! produced (zeros, a fill value, a packaged constant, or a forwarded
//! input). It performs no arithmetic. Packages use it to exercise the
//! loading and dispatch path without a compiled kernel library.
//!
//! ```json
//! {
//!   "inputs":  [{ "name": "x", "dtype": "f32", "shape": [null, 3, 224, 224] }],
//!   "outputs": [{ "name": "logits", "dtype": "f32", "shape": [1, 1000] },
//!               { "init": { "input": 0 } }]
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use super::backend::{BackendError, KernelBackend, LinkRequest, ModelRunner};
use super::device::Device;
use super::error::ExecutionError;
use crate::models::ConstantSet;
use crate::tensor::{DType, Tensor, TensorHandle};

/// Name referenced by manifests.
pub const SIGNATURE_BACKEND: &str = "signature";

/// Declared input: dtype plus per-dimension size, `null` for any size.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSignature {
    #[serde(default)]
    pub name: Option<String>,
    pub dtype: DType,
    pub shape: Vec<Option<usize>>,
}

impl InputSignature {
    fn matches(&self, shape: &[usize]) -> bool {
        self.shape.len() == shape.len()
            && self
                .shape
                .iter()
                .zip(shape)
                .all(|(expected, actual)| expected.map_or(true, |e| e == *actual))
    }

    fn describe(&self) -> String {
        let dims: Vec<String> = self
            .shape
            .iter()
            .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
            .collect();
        format!("[{}]", dims.join(", "))
    }
}

/// How an output tensor is produced.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputInit {
    #[default]
    Zeros,
    Fill(f64),
    Constant(String),
    Input(usize),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSignature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dtype: Option<DType>,
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
    #[serde(default)]
    pub init: OutputInit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureEntryPoint {
    pub inputs: Vec<InputSignature>,
    pub outputs: Vec<OutputSignature>,
}

/// Output recipe resolved at link time.
#[derive(Debug, Clone)]
enum OutputPlan {
    Zeros { dtype: DType, shape: Vec<usize> },
    Fill { dtype: DType, shape: Vec<usize>, value: f64 },
    Constant(String),
    /// Forward input `index`; `last_use` marks the final output reading it.
    Input { index: usize, last_use: bool },
}

/// Built-in backend for signature-described entry points.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureBackend;

impl SignatureBackend {
    fn plan(
        entry: &SignatureEntryPoint,
        constants: &ConstantSet,
    ) -> Result<Vec<OutputPlan>, BackendError> {
        let mut last_use: HashMap<usize, usize> = HashMap::new();
        for (position, output) in entry.outputs.iter().enumerate() {
            if let OutputInit::Input(index) = output.init {
                last_use.insert(index, position);
            }
        }

        entry
            .outputs
            .iter()
            .enumerate()
            .map(|(position, output)| {
                let label = output.name.clone().unwrap_or_else(|| format!("output {}", position));
                match &output.init {
                    OutputInit::Zeros | OutputInit::Fill(_) => {
                        let (dtype, shape) = match (output.dtype, output.shape.clone()) {
                            (Some(dtype), Some(shape)) => (dtype, shape),
                            _ => {
                                return Err(BackendError::InvalidEntryPoint(format!(
                                    "{} needs dtype and shape",
                                    label
                                )))
                            }
                        };
                        Tensor::byte_len(dtype, &shape).map_err(|e| {
                            BackendError::InvalidEntryPoint(format!("{}: {}", label, e))
                        })?;
                        Ok(match output.init {
                            OutputInit::Fill(value) => OutputPlan::Fill { dtype, shape, value },
                            _ => OutputPlan::Zeros { dtype, shape },
                        })
                    }
                    OutputInit::Constant(fqn) => {
                        let constant = constants.get(fqn).ok_or_else(|| {
                            BackendError::InvalidEntryPoint(format!(
                                "{} references unknown constant {}",
                                label, fqn
                            ))
                        })?;
                        if output.dtype.is_some_and(|d| d != constant.dtype())
                            || output.shape.as_deref().is_some_and(|s| s != constant.shape())
                        {
                            return Err(BackendError::InvalidEntryPoint(format!(
                                "{} does not match constant {}",
                                label, fqn
                            )));
                        }
                        Ok(OutputPlan::Constant(fqn.clone()))
                    }
                    OutputInit::Input(index) => {
                        if *index >= entry.inputs.len() {
                            return Err(BackendError::InvalidEntryPoint(format!(
                                "{} forwards input {} but only {} inputs are declared",
                                label,
                                index,
                                entry.inputs.len()
                            )));
                        }
                        Ok(OutputPlan::Input {
                            index: *index,
                            last_use: last_use.get(index) == Some(&position),
                        })
                    }
                }
            })
            .collect()
    }
}

impl KernelBackend for SignatureBackend {
    fn name(&self) -> &str {
        SIGNATURE_BACKEND
    }

    fn link(&self, request: &LinkRequest<'_>) -> Result<Box<dyn ModelRunner>, BackendError> {
        let entry: SignatureEntryPoint = serde_json::from_value(request.entry_point.clone())
            .map_err(|e| BackendError::InvalidEntryPoint(e.to_string()))?;
        let plan = Self::plan(&entry, request.constants)?;

        Ok(Box::new(SignatureRunner {
            inputs: entry.inputs,
            plan,
            constants: Arc::clone(request.constants),
            device: request.device.clone(),
            executions: 0,
        }))
    }
}

/// Runner produced by `SignatureBackend`.
pub struct SignatureRunner {
    inputs: Vec<InputSignature>,
    plan: Vec<OutputPlan>,
    constants: Arc<ConstantSet>,
    device: Device,
    executions: u64,
}

impl SignatureRunner {
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Calls completed by this runner.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    fn check_inputs(&self, inputs: &[TensorHandle<'_>]) -> Result<(), ExecutionError> {
        if inputs.len() != self.inputs.len() {
            return Err(ExecutionError::ArityMismatch {
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        for (index, (signature, handle)) in self.inputs.iter().zip(inputs).enumerate() {
            let tensor = handle.tensor();
            if tensor.dtype() != signature.dtype {
                return Err(ExecutionError::DTypeMismatch {
                    index,
                    expected: signature.dtype,
                    actual: tensor.dtype(),
                });
            }
            if !signature.matches(tensor.shape()) {
                return Err(ExecutionError::ShapeMismatch {
                    index,
                    expected: signature.describe(),
                    actual: tensor.shape().to_vec(),
                });
            }
        }
        Ok(())
    }
}

impl ModelRunner for SignatureRunner {
    fn execute(&mut self, inputs: Vec<TensorHandle<'_>>) -> Result<Vec<Tensor>, ExecutionError> {
        self.check_inputs(&inputs)?;

        let mut slots: Vec<Option<TensorHandle<'_>>> = inputs.into_iter().map(Some).collect();
        let mut outputs = Vec::with_capacity(self.plan.len());

        for plan in &self.plan {
            let tensor = match plan {
                OutputPlan::Zeros { dtype, shape } => Tensor::zeros(*dtype, shape.clone())
                    .map_err(|e| ExecutionError::Backend(e.to_string()))?,
                OutputPlan::Fill { dtype, shape, value } => {
                    Tensor::full(*dtype, shape.clone(), *value)
                        .map_err(|e| ExecutionError::Backend(e.to_string()))?
                }
                OutputPlan::Constant(fqn) => self
                    .constants
                    .get(fqn)
                    .cloned()
                    .ok_or_else(|| ExecutionError::Backend(format!("constant {} vanished", fqn)))?,
                OutputPlan::Input { index, last_use } => {
                    let slot = &mut slots[*index];
                    let forwarded = if *last_use {
                        slot.take().map(TensorHandle::to_tensor)
                    } else {
                        slot.as_ref().map(|h| h.tensor().clone())
                    };
                    forwarded.ok_or_else(|| {
                        ExecutionError::Backend(format!("input {} already consumed", index))
                    })?
                }
            };
            outputs.push(tensor);
        }

        self.executions += 1;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(
        entry_point: serde_json::Value,
        constants: ConstantSet,
    ) -> Result<Box<dyn ModelRunner>, BackendError> {
        let constants = Arc::new(constants);
        let device = Device::host();
        let call_spec = vec!["in".to_string(), "out".to_string()];
        SignatureBackend.link(&LinkRequest {
            model_name: "model",
            entry_point: &entry_point,
            call_spec: &call_spec,
            constants: &constants,
            device: &device,
            runner_index: 0,
        })
    }

    fn image_entry() -> serde_json::Value {
        json!({
            "inputs": [{ "name": "x", "dtype": "f32", "shape": [null, 3, 4, 4] }],
            "outputs": [{ "dtype": "f32", "shape": [1, 10] }]
        })
    }

    #[test]
    fn test_zeros_output_shape() {
        let mut runner = link(image_entry(), ConstantSet::empty()).unwrap();
        let x = Tensor::zeros(DType::F32, vec![2, 3, 4, 4]).unwrap();
        let outputs = runner.execute(vec![TensorHandle::Borrowed(&x)]).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].shape(), &[1, 10]);
        assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![0.0; 10]);
    }

    #[test]
    fn test_arity_mismatch() {
        let mut runner = link(image_entry(), ConstantSet::empty()).unwrap();
        let result = runner.execute(Vec::new());
        assert_eq!(
            result.unwrap_err(),
            ExecutionError::ArityMismatch { expected: 1, actual: 0 }
        );
    }

    #[test]
    fn test_shape_and_dtype_mismatch() {
        let mut runner = link(image_entry(), ConstantSet::empty()).unwrap();

        let wrong_shape = Tensor::zeros(DType::F32, vec![1, 1, 4, 4]).unwrap();
        let err = runner.execute(vec![TensorHandle::Borrowed(&wrong_shape)]).unwrap_err();
        assert!(matches!(err, ExecutionError::ShapeMismatch { index: 0, .. }));
        assert!(err.to_string().contains("[?, 3, 4, 4]"));

        let wrong_dtype = Tensor::zeros(DType::F16, vec![1, 3, 4, 4]).unwrap();
        let err = runner.execute(vec![TensorHandle::Borrowed(&wrong_dtype)]).unwrap_err();
        assert!(matches!(err, ExecutionError::DTypeMismatch { index: 0, .. }));
    }

    #[test]
    fn test_owned_input_is_forwarded_without_copy() {
        let entry = json!({
            "inputs": [{ "dtype": "u8", "shape": [4] }],
            "outputs": [{ "init": { "input": 0 } }]
        });
        let mut runner = link(entry, ConstantSet::empty()).unwrap();

        let x = Tensor::zeros(DType::U8, vec![4]).unwrap();
        let addr = x.storage_addr();
        let outputs = runner.execute(vec![TensorHandle::Owned(x)]).unwrap();
        assert_eq!(outputs[0].storage_addr(), addr);
        assert!(outputs[0].is_exclusive());
    }

    #[test]
    fn test_input_forwarded_twice() {
        let entry = json!({
            "inputs": [{ "dtype": "u8", "shape": [2] }],
            "outputs": [{ "init": { "input": 0 } }, { "init": { "input": 0 } }]
        });
        let mut runner = link(entry, ConstantSet::empty()).unwrap();
        let x = Tensor::zeros(DType::U8, vec![2]).unwrap();
        let outputs = runner.execute(vec![TensorHandle::Owned(x)]).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].shares_storage(&outputs[1]));
    }

    #[test]
    fn test_fill_output() {
        let entry = json!({
            "inputs": [],
            "outputs": [{ "dtype": "bf16", "shape": [3], "init": { "fill": 1.5 } }]
        });
        let mut runner = link(entry, ConstantSet::empty()).unwrap();
        let outputs = runner.execute(Vec::new()).unwrap();
        assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![1.5; 3]);
    }

    #[test]
    fn test_link_rejects_bad_entry_points() {
        let missing_shape = json!({ "inputs": [], "outputs": [{ "dtype": "f32" }] });
        assert!(matches!(
            link(missing_shape, ConstantSet::empty()),
            Err(BackendError::InvalidEntryPoint(_))
        ));

        let unknown_constant = json!({
            "inputs": [],
            "outputs": [{ "init": { "constant": "w" } }]
        });
        assert!(matches!(
            link(unknown_constant, ConstantSet::empty()),
            Err(BackendError::InvalidEntryPoint(msg)) if msg.contains("unknown constant w")
        ));

        let bad_forward = json!({ "inputs": [], "outputs": [{ "init": { "input": 0 } }] });
        assert!(link(bad_forward, ConstantSet::empty()).is_err());

        assert!(link(json!("not an object"), ConstantSet::empty()).is_err());

        let huge_fill = json!({
            "inputs": [],
            "outputs": [{ "dtype": "f32", "shape": [usize::MAX / 4 + 1], "init": { "fill": 1.0 } }]
        });
        assert!(matches!(
            link(huge_fill, ConstantSet::empty()),
            Err(BackendError::InvalidEntryPoint(msg)) if msg.contains("overflow")
        ));
    }

    #[test]
    fn test_constant_output() {
        let weight = Tensor::from_f32(vec![2], &[0.25, 0.75]).unwrap();
        let constants = ConstantSet::from_entries(vec![("fc.bias".to_string(), weight)]).unwrap();
        let entry = json!({ "inputs": [], "outputs": [{ "init": { "constant": "fc.bias" } }] });
        let mut runner = link(entry, constants).unwrap();

        let outputs = runner.execute(Vec::new()).unwrap();
        assert_eq!(outputs[0].to_f32_vec().unwrap(), vec![0.25, 0.75]);
    }
}
