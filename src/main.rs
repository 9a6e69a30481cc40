#![recursion_limit = "256"]

use anyhow::Context;
use burn::backend::{Autodiff, NdArray, Wgpu};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ad_volume_classifier::{cli::Options, device::DevicePlacement, train};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (options, unknown) = match Options::parse_known(std::env::args()) {
        Ok(parsed) => parsed,
        Err(err) => err.exit(),
    };
    if !unknown.is_empty() {
        warn!("unknown arguments: {unknown:?}");
    }

    let config = options.to_config();
    let placement = DevicePlacement::from_gpu_ids(&options.gpuid);
    info!("Training {:?} with {:?} on {placement:?}", config.network, config.optimizer);

    let reports = match placement {
        DevicePlacement::Host => {
            train::run::<Autodiff<NdArray>>(&config, DevicePlacement::host_device())
        }
        DevicePlacement::Gpu(id) => {
            train::run::<Autodiff<Wgpu>>(&config, DevicePlacement::gpu_device(id))
        }
    }
    .context("training failed")?;

    if let Some(last) = reports.last() {
        info!(
            "Finished after {} epochs, last checkpoint {}",
            reports.len(),
            last.checkpoint.display()
        );
    }

    Ok(())
}
