//! Per-layer cost report for a model.
//!
//! [`stat`] runs one forward pass on a random `(1, C, H, W)` input while leaf
//! layers (convolutions, activations, pixel shuffles) record their shapes,
//! parameter counts, multiply-adds and memory traffic. Recording is
//! thread-local and only active inside [`stat`]; outside it the hooks cost a
//! single flag check.
//!
//! Conventions: `MAdd` counts a multiply and an add separately
//! (`2k - 1` per output for a `k`-term dot product, plus one for the bias);
//! `Flops` counts one per multiply-accumulate; memory figures assume f32.

use crate::nn::Module;
use crate::tensor::RawTensor;
use std::cell::RefCell;
use std::fmt;
use std::time::{Duration, Instant};

const BYTES_PER_ELEMENT: u64 = std::mem::size_of::<f32>() as u64;

thread_local! {
    static RECORDER: RefCell<Option<Vec<LayerStat>>> = const { RefCell::new(None) };
}

/// What a leaf layer reports about one call.
#[derive(Clone, Debug)]
pub struct LayerCost {
    pub kind: &'static str,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub params: usize,
    pub madds: u64,
    pub flops: u64,
}

/// One row of the report: a single leaf-layer call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerStat {
    pub index: usize,
    pub kind: &'static str,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub params: usize,
    /// Bytes of the output activation
    pub memory: u64,
    pub madds: u64,
    pub flops: u64,
    /// Bytes read: input activation plus parameters
    pub mem_read: u64,
    /// Bytes written: output activation
    pub mem_write: u64,
}

pub(crate) fn is_recording() -> bool {
    RECORDER.with(|r| r.borrow().is_some())
}

pub(crate) fn record(cost: LayerCost) {
    RECORDER.with(|r| {
        if let Some(rows) = r.borrow_mut().as_mut() {
            let in_elems = cost.input_shape.iter().product::<usize>() as u64;
            let out_elems = cost.output_shape.iter().product::<usize>() as u64;
            let out_bytes = out_elems * BYTES_PER_ELEMENT;
            rows.push(LayerStat {
                index: rows.len(),
                kind: cost.kind,
                input_shape: cost.input_shape,
                output_shape: cost.output_shape,
                params: cost.params,
                memory: out_bytes,
                madds: cost.madds,
                flops: cost.flops,
                mem_read: (in_elems + cost.params as u64) * BYTES_PER_ELEMENT,
                mem_write: out_bytes,
            });
        }
    });
}

/// Turns recording on for its lifetime; clears the recorder on drop, including
/// when the forward pass panics.
struct RecordingGuard;

impl RecordingGuard {
    fn start() -> Self {
        RECORDER.with(|r| *r.borrow_mut() = Some(Vec::new()));
        RecordingGuard
    }

    fn finish(self) -> Vec<LayerStat> {
        RECORDER.with(|r| r.borrow_mut().take().unwrap_or_default())
    }
}

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        RECORDER.with(|r| *r.borrow_mut() = None);
    }
}

/// Report for one model and input size.
#[derive(Clone, Debug)]
pub struct ModelStat {
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub layers: Vec<LayerStat>,
    /// Unique parameters of the model (shared sub-modules counted once)
    pub total_params: usize,
    pub trainable_params: usize,
    pub elapsed: Duration,
}

impl ModelStat {
    pub fn total_madds(&self) -> u64 {
        self.layers.iter().map(|l| l.madds).sum()
    }

    pub fn total_flops(&self) -> u64 {
        self.layers.iter().map(|l| l.flops).sum()
    }

    pub fn total_memory(&self) -> u64 {
        self.layers.iter().map(|l| l.memory).sum()
    }

    pub fn total_mem_rw(&self) -> u64 {
        self.layers.iter().map(|l| l.mem_read + l.mem_write).sum()
    }
}

/// Profile `model` on a random input of shape `(1, *chw)`.
pub fn stat<M: Module + ?Sized>(model: &M, chw: &[usize]) -> ModelStat {
    let mut input_shape = vec![1];
    input_shape.extend_from_slice(chw);
    let input = RawTensor::rand(&input_shape);

    let guard = RecordingGuard::start();
    let start = Instant::now();
    let output = model.forward(&input);
    let elapsed = start.elapsed();
    let layers = guard.finish();

    let report = ModelStat {
        input_shape,
        output_shape: output.borrow().shape.clone(),
        layers,
        total_params: model.num_parameters(),
        trainable_params: model.num_trainable_parameters(),
        elapsed,
    };
    log::info!(
        "profiled {} layer calls: {} params, {:.2} MMAdd, {:.2} MFlops in {:?}",
        report.layers.len(),
        report.total_params,
        report.total_madds() as f64 / 1e6,
        report.total_flops() as f64 / 1e6,
        report.elapsed
    );
    report
}

/// `1234567` -> `1,234,567`
fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn shape_str(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().skip(1).map(usize::to_string).collect();
    dims.join("x")
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

impl fmt::Display for ModelStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>4}  {:<13}{:>14}{:>14}{:>10}{:>12}{:>14}{:>14}{:>14}{:>14}",
            "", "module", "input", "output", "params", "memory(MB)", "MAdd", "Flops", "MemRead(B)", "MemWrite(B)"
        )?;
        for l in &self.layers {
            writeln!(
                f,
                "{:>4}  {:<13}{:>14}{:>14}{:>10}{:>12.2}{:>14}{:>14}{:>14}{:>14}",
                l.index,
                l.kind,
                shape_str(&l.input_shape),
                shape_str(&l.output_shape),
                thousands(l.params as u64),
                megabytes(l.memory),
                thousands(l.madds),
                thousands(l.flops),
                thousands(l.mem_read),
                thousands(l.mem_write),
            )?;
        }
        writeln!(f, "{}", "=".repeat(133))?;
        writeln!(
            f,
            "Input: {:?}  Output: {:?}",
            self.input_shape, self.output_shape
        )?;
        writeln!(
            f,
            "Total params: {} ({} trainable)",
            thousands(self.total_params as u64),
            thousands(self.trainable_params as u64)
        )?;
        writeln!(f, "Total memory: {:.2}MB", megabytes(self.total_memory()))?;
        writeln!(
            f,
            "Total MAdd: {:.2}MMAdd",
            self.total_madds() as f64 / 1e6
        )?;
        writeln!(
            f,
            "Total Flops: {:.2}MFlops",
            self.total_flops() as f64 / 1e6
        )?;
        write!(f, "Total MemR+W: {:.2}MB", megabytes(self.total_mem_rw()))
    }
}
