use std::path::PathBuf;
use std::time::Duration;
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::renderer::core::instance::ValidationMode;

const MAX_DEFAULT_THREADS: usize = 8;

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "vkraii", about = "RAII Vulkan demo: parallel secondary command buffers")]
pub struct CliArgs {
    /// Require the Khronos validation layer (used when available in debug builds)
    #[arg(short, long)]
    pub validation: bool,

    /// Wait for vertical blank (FIFO present mode)
    #[arg(long)]
    pub vsync: bool,

    /// Start in borderless fullscreen
    #[arg(short, long)]
    pub fullscreen: bool,

    #[arg(short = 'W', long, default_value_t = 1280)]
    pub width: u32,

    #[arg(short = 'H', long, default_value_t = 720)]
    pub height: u32,

    /// Index of the physical device to use, as printed by --list-gpus
    #[arg(short, long)]
    pub gpu: Option<usize>,

    /// Print the available physical devices and exit
    #[arg(long)]
    pub list_gpus: bool,

    /// Threads recording secondary command buffers
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Run a timed benchmark and exit
    #[arg(short, long)]
    pub benchmark: bool,

    /// Seconds to run before measuring
    #[arg(long, default_value_t = 1.0)]
    pub benchmark_warmup: f64,

    /// Seconds to measure
    #[arg(long, default_value_t = 10.0)]
    pub benchmark_runtime: f64,

    /// Stop after this many measured frames instead of after --benchmark-runtime
    #[arg(long)]
    pub benchmark_frames: Option<u32>,

    /// Write benchmark results to this file
    #[arg(long)]
    pub benchmark_path: Option<PathBuf>,

    /// Directory to load assets from
    #[arg(long)]
    pub resourcepath: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkSettings {
    pub warmup: Duration,
    pub runtime: Duration,
    pub max_frames: Option<u32>,
    pub output: Option<PathBuf>,
}

/// Contains configuration options for the renderer like the resolution, vsync, and other settings
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// `--validation` was given: a missing layer is an error
    pub validation_requested: bool,
    /// Validation wanted, either requested or by the debug build default
    pub validation: bool,
    pub vsync: bool,
    pub fullscreen: bool,
    pub width: u32,
    pub height: u32,
    pub gpu: Option<usize>,
    pub list_gpus: bool,
    pub threads: usize,
    pub benchmark: Option<BenchmarkSettings>,
    pub resource_path: Option<PathBuf>,
}

impl RenderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        if args.width == 0 || args.height == 0 {
            return Err(eyre!("Window size must be non-zero, got {}x{}", args.width, args.height));
        }

        if let Some(path) = args.resourcepath.as_ref() {
            if !path.is_dir() {
                return Err(eyre!("Resource path {:?} is not a directory", path));
            }
        }

        let benchmark = if args.benchmark {
            Some(BenchmarkSettings {
                warmup: Self::seconds("--benchmark-warmup", args.benchmark_warmup)?,
                runtime: Self::seconds("--benchmark-runtime", args.benchmark_runtime)?,
                max_frames: args.benchmark_frames,
                output: args.benchmark_path,
            })
        } else {
            None
        };

        let threads = match args.threads {
            Some(0) => return Err(eyre!("--threads must be at least 1")),
            Some(threads) => threads,
            None => default_thread_count(),
        };

        Ok(Self {
            validation_requested: args.validation,
            validation: args.validation || cfg!(debug_assertions),
            vsync: args.vsync,
            fullscreen: args.fullscreen,
            width: args.width,
            height: args.height,
            gpu: args.gpu,
            list_gpus: args.list_gpus,
            threads,
            benchmark,
            resource_path: args.resourcepath,
        })
    }

    pub fn validation_mode(&self) -> ValidationMode {
        if self.validation_requested {
            ValidationMode::Required
        } else if self.validation {
            ValidationMode::IfAvailable
        } else {
            ValidationMode::Off
        }
    }

    fn seconds(flag: &str, value: f64) -> Result<Duration> {
        Duration::try_from_secs_f64(value)
            .map_err(|_| eyre!("{} must be a non-negative number of seconds, got {}", flag, value))
    }
}

pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_THREADS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<RenderConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("vkraii").chain(args.iter().copied()))?;
        RenderConfig::from_args(args)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(!config.vsync);
        assert!(!config.fullscreen);
        assert_eq!(config.gpu, None);
        assert_eq!(config.benchmark, None);
        assert!(config.threads >= 1 && config.threads <= MAX_DEFAULT_THREADS);
    }

    #[test]
    fn window_and_device_flags() {
        let config = parse(&[
            "--vsync", "--fullscreen", "--width", "800", "--height", "600",
            "--gpu", "1", "--threads", "3", "--validation",
        ]).unwrap();
        assert!(config.vsync);
        assert!(config.fullscreen);
        assert!(config.validation);
        assert!(config.validation_requested);
        assert_eq!(config.validation_mode(), ValidationMode::Required);
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.gpu, Some(1));
        assert_eq!(config.threads, 3);
    }

    #[test]
    fn debug_default_validation_is_not_a_request() {
        let config = parse(&[]).unwrap();
        assert!(!config.validation_requested);
        assert_eq!(config.validation, cfg!(debug_assertions));

        let expected = if cfg!(debug_assertions) {
            ValidationMode::IfAvailable
        } else {
            ValidationMode::Off
        };
        assert_eq!(config.validation_mode(), expected);
    }

    #[test]
    fn benchmark_settings() {
        let config = parse(&[
            "--benchmark", "--benchmark-warmup", "0.5", "--benchmark-runtime", "3",
            "--benchmark-frames", "100", "--benchmark-path", "out.txt",
        ]).unwrap();
        assert_eq!(
            config.benchmark,
            Some(BenchmarkSettings {
                warmup: Duration::from_millis(500),
                runtime: Duration::from_secs(3),
                max_frames: Some(100),
                output: Some(PathBuf::from("out.txt")),
            }),
        );
    }

    #[test]
    fn benchmark_flags_ignored_without_benchmark() {
        let config = parse(&["--benchmark-runtime", "3"]).unwrap();
        assert_eq!(config.benchmark, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--threads", "0"]).is_err());
        assert!(parse(&["--benchmark", "--benchmark-runtime", "-1"]).is_err());
        assert!(parse(&["--resourcepath", "/definitely/not/a/dir"]).is_err());
        assert!(parse(&["--unknown"]).is_err());
    }

    #[test]
    fn existing_resource_path_is_kept() {
        let dir = std::env::temp_dir();
        let config = parse(&["--resourcepath", dir.to_str().unwrap()]).unwrap();
        assert_eq!(config.resource_path, Some(dir));
    }
}
