#![forbid(unsafe_code)]

// Native-only diagnostic runner. Keep a stub `main` so `--workspace` builds for wasm targets
// still succeed.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs;
    use std::path::PathBuf;

    use anyhow::{bail, Context, Result};
    use clap::Parser;
    use tracing::info;
    use tracing_subscriber::EnvFilter;
    use vgfb::{ModeRequest, Registry, Resolution, VgfbConfig};

    #[derive(Debug, Parser)]
    #[command(about = "Open a virtual framebuffer, negotiate a mode and flip between its halves")]
    pub struct Args {
        /// Resolution to negotiate, e.g. `1024x768`. Added to the mode table if missing.
        #[arg(long, default_value = "800x600")]
        pub mode: Resolution,

        /// Bits per pixel (24 or 32).
        #[arg(long, default_value_t = 32)]
        pub bpp: u32,

        /// Number of render-then-pan cycles.
        #[arg(long, default_value_t = 2)]
        pub flips: u32,

        /// Per-instance buffer cap in bytes; overrides `VGFB_MAX_BUFFER_BYTES`.
        #[arg(long)]
        pub max_buffer_bytes: Option<usize>,

        /// Write the final buffer contents to this file.
        #[arg(long)]
        pub dump: Option<PathBuf>,
    }

    fn build_config(args: &Args) -> Result<VgfbConfig> {
        let mut config = VgfbConfig::from_env().context("invalid VGFB_* environment")?;
        if !config.modes.contains(&args.mode) {
            config.modes.push(args.mode);
        }
        if let Some(max) = args.max_buffer_bytes {
            config.max_buffer_bytes = max;
        }
        Ok(config)
    }

    pub fn main() -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();

        let args = Args::parse();
        run(&args)
    }

    pub fn run(args: &Args) -> Result<()> {
        let registry = Registry::new(build_config(args)?);
        let handle = registry.open_new().context("failed to open a device")?;
        let notices = handle.remap_notices();

        let mode = handle
            .set_geometry(&ModeRequest::new(args.mode.xres, args.mode.yres, args.bpp))
            .with_context(|| format!("failed to set mode {} at {}bpp", args.mode, args.bpp))?;
        info!(
            display = handle.id(),
            mode = %mode.resolution(),
            bytes = mode.buffer_len(),
            "mode negotiated"
        );

        let half = mode.line_length() * u64::from(mode.yres);
        let half_len = usize::try_from(half).context("framebuffer half exceeds address space")?;
        let grant = handle.map().context("failed to map framebuffer")?;
        if grant.len() != mode.buffer_len() {
            bail!(
                "mapped {} bytes, expected {}",
                grant.len(),
                mode.buffer_len()
            );
        }

        let mut visible = handle.geometry()?.yoffset;
        for flip in 0..args.flips {
            let hidden = if visible == 0 { mode.yres } else { 0 };
            let pattern = (flip % 255) as u8 + 1;
            grant
                .memory()
                .fill(u64::from(hidden) * mode.line_length(), half_len, pattern)
                .context("failed to draw into the hidden half")?;
            visible = handle
                .pan(0, hidden)
                .with_context(|| format!("failed to pan to yoffset {hidden}"))?
                .yoffset;
            info!(flip, yoffset = visible, pattern, "flipped");
        }
        handle.unmap(grant)?;

        if let Some(path) = &args.dump {
            let len = usize::try_from(handle.stats().buffer_len)
                .context("framebuffer exceeds address space")?;
            let bytes = handle.read(0, len)?;
            fs::write(path, &bytes)
                .with_context(|| format!("failed to write dump: {}", path.display()))?;
            info!(path = %path.display(), bytes = bytes.len(), "buffer dumped");
        }

        let stale = notices.try_iter().count();
        let stats = handle.stats();
        info!(swaps = stats.swaps, stale_notices = stale, "done");
        handle.close()?;
        registry.shutdown();
        Ok(())
    }

}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
