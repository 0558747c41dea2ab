use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shunt_core::runtime::{self, EmulatedDevice};
use shunt_core::{DType, Device, Tensor, UnaryOp};
use shunt_fallback::FallbackConfig;

#[derive(Parser)]
#[command(
    name = "shunt",
    about = "Run tensor ops on the host when the accelerator cannot",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Compute lgamma on a device, optionally through the host fallback
    Run {
        /// Input values (comma-separated)
        #[arg(long, value_delimiter = ',', default_value = "0.5,1.0,2.0")]
        values: Vec<f64>,
        /// Device to place the input on: cpu, cuda:N
        #[arg(long, default_value = "cuda:0")]
        device: Device,
        /// Element type: f32, f64
        #[arg(long, default_value = "f32")]
        dtype: DType,
        /// Call the device kernel directly
        #[arg(long)]
        no_fallback: bool,
        /// JSON fallback config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Serve the device with the host-backed emulator
        #[arg(long, overrides_with = "no_emulate")]
        emulate: bool,
        /// Use the real CUDA runtime
        #[arg(long)]
        no_emulate: bool,
        /// Ops whose kernels fail to compile on the emulated device
        #[arg(long, value_delimiter = ',', default_value = "lgamma")]
        jit_fail: Vec<UnaryOp>,
    },
    /// Show version, attached devices and redirected ops
    Info,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            values,
            device,
            dtype,
            no_fallback,
            config,
            emulate,
            no_emulate,
            jit_fail,
        } => {
            let emulate = if emulate {
                true
            } else if no_emulate {
                false
            } else {
                !cfg!(feature = "cuda")
            };
            cmd_run(RunArgs {
                values,
                device,
                dtype,
                fallback: !no_fallback,
                config,
                emulate,
                jit_fail,
            })
        }
        Commands::Info => cmd_info(),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

struct RunArgs {
    values: Vec<f64>,
    device: Device,
    dtype: DType,
    fallback: bool,
    config: Option<PathBuf>,
    emulate: bool,
    jit_fail: Vec<UnaryOp>,
}

fn cmd_run(args: RunArgs) -> Result<()> {
    if let (Some(ordinal), true) = (args.device.ordinal(), args.emulate) {
        let dev = args
            .jit_fail
            .iter()
            .fold(EmulatedDevice::new(ordinal), |dev, &op| dev.with_jit_failure(op));
        runtime::attach(Arc::new(dev));
    }

    if args.fallback {
        let config = match &args.config {
            Some(path) => FallbackConfig::from_file(path)?,
            None => FallbackConfig::default(),
        };
        shunt_fallback::install_global(&config).context("installing host fallback")?;
    }

    let n = args.values.len();
    let host = match args.dtype {
        DType::F32 => {
            let data: Vec<f32> = args.values.iter().map(|&v| v as f32).collect();
            Tensor::from_f32(&data, &[n])
        }
        DType::F64 => Tensor::from_f64(&args.values, &[n]),
        other => bail!("lgamma needs a float dtype, got {other}"),
    };

    let input = host
        .to(args.device)
        .with_context(|| format!("moving input to {}", args.device))?;
    let out = input.lgamma().context("lgamma failed")?;

    let values = match out.dtype() {
        DType::F32 => out
            .to_host()?
            .to_vec_f32()?
            .into_iter()
            .map(f64::from)
            .collect(),
        _ => out.to_host()?.to_vec_f64()?,
    };
    println!("lgamma({:?}) = {:?}", args.values, values);
    println!("device: {}", out.device());
    Ok(())
}

fn cmd_info() -> Result<()> {
    println!("shunt v{}", env!("CARGO_PKG_VERSION"));

    #[cfg(feature = "cuda")]
    if let Err(e) = runtime::get(Device::Cuda(0)) {
        println!("  cuda:0 unavailable: {e}");
    }

    println!("\nDevices");
    let devices = runtime::attached();
    if devices.is_empty() {
        println!("  (none attached)");
    }
    for rt in devices {
        println!("  {:<8} {:<10} {}", rt.device().to_string(), rt.name(), rt.arch());
    }

    let ops = FallbackConfig::default()
        .unique_ops()
        .iter()
        .map(|op| op.name())
        .collect::<Vec<_>>()
        .join(", ");
    println!("\nHost fallback ops: {ops}");
    Ok(())
}
