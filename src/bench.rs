use crate::{
    buffer::{HostAllocKind, HostBuffer},
    scalar::Scalar,
    tensor::{Location, Tensor},
};
use anyhow::{bail, Result};
use std::{
    fmt::{self, Display},
    hint::black_box,
    time::{Duration, Instant},
};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One measured copy operation.
#[derive(Clone, Copy, Debug)]
pub struct TransferSample {
    /// Where the copy read from.
    pub source: Location,
    /// Where the copy wrote to.
    pub dest: Location,
    /// Bytes moved, 0 when no data movement occurred.
    pub bytes: usize,
    /// Wall-clock duration of the operation.
    pub duration: Duration,
}

impl TransferSample {
    /// Bandwidth of the sample, 0 when no bytes were moved.
    pub fn gigabytes_per_sec(&self) -> f64 {
        if self.bytes == 0 {
            return 0.0;
        }
        self.bytes as f64 / GIB / self.duration.as_secs_f64()
    }
}

/** The aggregate of a repeated measurement.

Reports the median duration across all samples, not the mean, so that
rare high-latency iterations (driver scheduling jitter) do not skew
the result.
*/
#[derive(Clone, Debug)]
pub struct BenchmarkResult {
    label: String,
    median: Duration,
    bytes: usize,
}

impl BenchmarkResult {
    fn from_samples(label: &str, samples: &[TransferSample]) -> Self {
        let median = median(samples.iter().map(|x| x.duration).collect());
        let bytes = samples.last().map_or(0, |x| x.bytes);
        Self {
            label: label.to_string(),
            median,
            bytes,
        }
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    /// Median duration across all samples.
    pub fn median(&self) -> Duration {
        self.median
    }
    /// Bytes moved per iteration, 0 when no data movement occurred.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
    /// Bandwidth derived from the median, 0 when no bytes were moved.
    pub fn gigabytes_per_sec(&self) -> f64 {
        if self.bytes == 0 {
            return 0.0;
        }
        self.bytes as f64 / GIB / self.median.as_secs_f64()
    }
}

/** Formats a report row.

The label is left-justified, the duration right-justified in
milliseconds above 10 ms and microseconds otherwise. The bandwidth is
omitted above 1000 GB/s. */
impl Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let secs = self.median.as_secs_f64();
        let duration = if secs > 10e-3 {
            format!("{:>10.2} ms", secs * 1e3)
        } else {
            format!("{:>10.2} us", secs * 1e6)
        };
        let gbs = self.gigabytes_per_sec();
        let transfer_rate = if gbs < 1e3 {
            format!("{gbs:>8.1} GB/s")
        } else {
            String::new()
        };
        write!(f, "    {:<17} {duration} {transfer_rate}", self.label)
    }
}

fn median(mut durations: Vec<Duration>) -> Duration {
    assert!(!durations.is_empty());
    durations.sort_unstable();
    let mid = durations.len() / 2;
    if durations.len() % 2 == 1 {
        durations[mid]
    } else {
        (durations[mid - 1] + durations[mid]) / 2
    }
}

/** Copies data around the host and the device to warm up hardware.

Performs `iters` round trips pageable host -> pinned host -> device ->
pageable host. Nothing is measured. */
#[cfg(feature = "cuda")]
pub fn warmup(len: usize, iters: usize) -> Result<()> {
    let mut src = Tensor::<i8>::ones(Location::Host, len)?;
    let mut imed = Tensor::zeros(Location::PinnedHost, len)?;
    let mut dst = Tensor::zeros(Location::Device, len)?;
    for _ in 0..iters {
        imed.copy_from(&src)?;
        dst.copy_from(&imed)?;
        src.copy_from(&dst)?;
    }
    Ok(())
}

/** Times `iters` conversion-copies of `src` into a fresh tensor at
`location`.

Each iteration allocates, copies and discards the destination. */
pub fn measure_copy_to<T: Scalar, U: Scalar>(
    src: &Tensor<T>,
    location: Location,
    label: &str,
    iters: usize,
) -> Result<BenchmarkResult> {
    if iters == 0 {
        bail!("{label}: at least one iteration is required");
    }
    let source = src.location();
    let mut samples = Vec::with_capacity(iters);
    for _ in 0..iters {
        let start = Instant::now();
        let dst = src.to::<U>(location)?;
        let duration = start.elapsed();
        samples.push(TransferSample {
            source,
            dest: location,
            bytes: dst.size_in_bytes(),
            duration,
        });
    }
    Ok(BenchmarkResult::from_samples(label, &samples))
}

/** Times `iters` in-place copies of `src` into the reused `dst`.

The destination is fully overwritten on every iteration. */
pub fn measure_copy_into<T: Scalar>(
    src: &Tensor<T>,
    dst: &mut Tensor<T>,
    label: &str,
    iters: usize,
) -> Result<BenchmarkResult> {
    if iters == 0 {
        bail!("{label}: at least one iteration is required");
    }
    let (source, dest) = (src.location(), dst.location());
    let bytes = dst.size_in_bytes();
    let mut samples = Vec::with_capacity(iters);
    for _ in 0..iters {
        let start = Instant::now();
        dst.copy_from(src)?;
        let duration = start.elapsed();
        samples.push(TransferSample {
            source,
            dest,
            bytes,
            duration,
        });
    }
    Ok(BenchmarkResult::from_samples(label, &samples))
}

/** Times `iters` view creations over `buffer`, optionally wrapping each
view in a tensor.

No data is moved, so the reported bandwidth is 0. */
pub fn measure_cast<T: Scalar>(
    buffer: &HostBuffer<T>,
    wrap_tensor: bool,
    label: &str,
    iters: usize,
) -> Result<BenchmarkResult> {
    if iters == 0 {
        bail!("{label}: at least one iteration is required");
    }
    let location = match buffer.kind() {
        HostAllocKind::Pageable => Location::Host,
        HostAllocKind::Pinned => Location::PinnedHost,
    };
    let mut samples = Vec::with_capacity(iters);
    for _ in 0..iters {
        let start = Instant::now();
        let view = buffer.as_array_view();
        if wrap_tensor {
            black_box(Tensor::from_array_view(black_box(view)));
        } else {
            black_box(view);
        }
        let duration = start.elapsed();
        samples.push(TransferSample {
            source: location,
            dest: location,
            bytes: 0,
            duration,
        });
    }
    Ok(BenchmarkResult::from_samples(label, &samples))
}
