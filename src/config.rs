//! CLI arguments and validated scanner configuration
//!
//! [`CliArgs`] is the raw clap surface; [`ScanConfig::from_args`] turns it
//! into a validated config the scanner trusts without re-checking.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;
use crate::fs::ClampBounds;

/// Hard ceiling on worker threads
pub const MAX_WORKERS: usize = 512;

/// Default worker thread count
pub const DEFAULT_WORKERS: usize = 8;

/// Default seconds to wait for the target to become statable
pub const DEFAULT_SETUP_TIMEOUT: u64 = 3;

/// Hard ceiling on bloom shards
pub const MAX_DEDUP_SHARDS: usize = 64;

/// Default bloom shard count
pub const DEFAULT_DEDUP_SHARDS: usize = 9;

/// Default bloom salt count
pub const DEFAULT_DEDUP_SALTS: u32 = 6;

/// Default bloom bit field width (24-bit fields)
pub const DEFAULT_DEDUP_BITS: u64 = 0xff_ffff;

/// Smallest permitted bloom bit field width
pub const MIN_DEDUP_BITS: u64 = 0xffff;

/// Leeway added past "now" before a timestamp counts as out of range
pub const CLAMP_LEEWAY_SECS: i64 = 86_400;

/// Concurrent filesystem scanner producing per-directory usage and age rollups
#[derive(Parser, Debug)]
#[command(name = "scanfs", version, about)]
pub struct CliArgs {
    /// Directory to scan
    pub target: PathBuf,

    /// Number of worker threads
    #[arg(short = 't', long = "threads", default_value_t = DEFAULT_WORKERS)]
    pub threads: usize,

    /// Seconds to wait for the target directory to respond at startup
    #[arg(long = "setup-timeout", default_value_t = DEFAULT_SETUP_TIMEOUT)]
    pub setup_timeout: u64,

    /// Entry names to skip entirely (repeatable or comma-separated)
    #[arg(short = 'f', long = "filter", value_delimiter = ',')]
    pub filters: Vec<String>,

    /// Hardlink deduplication strategy
    #[arg(long = "dedup", value_enum, default_value_t = DedupStrategyArg::Bloom)]
    pub dedup: DedupStrategyArg,

    /// Bloom filter shard count
    #[arg(long = "dedup-shards", default_value_t = DEFAULT_DEDUP_SHARDS)]
    pub dedup_shards: usize,

    /// Bloom filter salt count
    #[arg(long = "dedup-salts", default_value_t = DEFAULT_DEDUP_SALTS)]
    pub dedup_salts: u32,

    /// Bloom filter bit field width
    #[arg(long = "dedup-bits", default_value_t = DEFAULT_DEDUP_BITS)]
    pub dedup_bits: u64,

    /// Repair timestamps older than this epoch second
    #[arg(long = "clamp-min")]
    pub clamp_min: Option<i64>,

    /// Repair timestamps newer than this epoch second (default: now plus
    /// one day)
    #[arg(long = "clamp-max")]
    pub clamp_max: Option<i64>,

    /// Suppress the per-scan report
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Increase log verbosity
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print per-owner byte totals in the report
    #[arg(short = 'u', long = "user-sizes")]
    pub show_users: bool,
}

/// CLI-facing dedup strategy selector
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStrategyArg {
    /// Precise hash-set cache
    Exact,
    /// Sharded bloom filter, bounded memory with a tiny undercount risk
    Bloom,
}

/// Validated dedup strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupStrategy {
    Exact,
    Bloom {
        shards: usize,
        salts: u32,
        bits: u64,
    },
}

impl Default for DedupStrategy {
    fn default() -> Self {
        DedupStrategy::Bloom {
            shards: DEFAULT_DEDUP_SHARDS,
            salts: DEFAULT_DEDUP_SALTS,
            bits: DEFAULT_DEDUP_BITS,
        }
    }
}

/// Validated scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub target: PathBuf,
    pub workers: usize,
    pub setup_timeout_secs: u64,
    pub filters: Vec<String>,
    pub dedup: DedupStrategy,
    pub clamp: Option<ClampBounds>,
    pub quiet: bool,
    pub show_users: bool,
}

impl ScanConfig {
    /// Validate CLI arguments into a usable configuration
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if args.threads == 0 || args.threads > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.threads,
                max: MAX_WORKERS,
            });
        }
        if args.setup_timeout == 0 {
            return Err(ConfigError::InvalidSetupTimeout {
                secs: args.setup_timeout,
            });
        }
        let dedup = match args.dedup {
            DedupStrategyArg::Exact => DedupStrategy::Exact,
            DedupStrategyArg::Bloom => {
                if args.dedup_shards == 0 || args.dedup_shards > MAX_DEDUP_SHARDS {
                    return Err(ConfigError::InvalidShardCount {
                        count: args.dedup_shards,
                        max: MAX_DEDUP_SHARDS,
                    });
                }
                if args.dedup_salts == 0 {
                    return Err(ConfigError::InvalidSaltCount {
                        count: args.dedup_salts,
                    });
                }
                if args.dedup_bits < MIN_DEDUP_BITS {
                    return Err(ConfigError::InvalidBitWidth {
                        bits: args.dedup_bits,
                        min: MIN_DEDUP_BITS,
                    });
                }
                DedupStrategy::Bloom {
                    shards: args.dedup_shards,
                    salts: args.dedup_salts,
                    bits: args.dedup_bits,
                }
            }
        };
        let clamp = Self::clamp_bounds(args.clamp_min, args.clamp_max)?;
        Ok(Self {
            target: args.target.clone(),
            workers: args.threads,
            setup_timeout_secs: args.setup_timeout,
            filters: args.filters.clone(),
            dedup,
            clamp,
            quiet: args.quiet,
            show_users: args.show_users,
        })
    }

    fn clamp_bounds(
        min: Option<i64>,
        max: Option<i64>,
    ) -> Result<Option<ClampBounds>, ConfigError> {
        if min.is_none() && max.is_none() {
            return Ok(None);
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let min = min.unwrap_or(0);
        let max = max.unwrap_or(now + CLAMP_LEEWAY_SECS);
        if min > max {
            return Err(ConfigError::InvalidClampBounds { min, max });
        }
        Ok(Some(ClampBounds { min, max }))
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target: PathBuf::from("."),
            workers: DEFAULT_WORKERS,
            setup_timeout_secs: DEFAULT_SETUP_TIMEOUT,
            filters: Vec::new(),
            dedup: DedupStrategy::default(),
            clamp: None,
            quiet: false,
            show_users: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs::parse_from(["scanfs", "/data"])
    }

    #[test]
    fn test_defaults() {
        let config = ScanConfig::from_args(&base_args()).unwrap();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.setup_timeout_secs, DEFAULT_SETUP_TIMEOUT);
        assert_eq!(
            config.dedup,
            DedupStrategy::Bloom {
                shards: DEFAULT_DEDUP_SHARDS,
                salts: DEFAULT_DEDUP_SALTS,
                bits: DEFAULT_DEDUP_BITS,
            }
        );
        assert!(config.clamp.is_none());
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_thread_bounds() {
        let mut args = base_args();
        args.threads = 0;
        assert!(matches!(
            ScanConfig::from_args(&args),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));

        args.threads = MAX_WORKERS + 1;
        assert!(matches!(
            ScanConfig::from_args(&args),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));

        args.threads = MAX_WORKERS;
        assert!(ScanConfig::from_args(&args).is_ok());
    }

    #[test]
    fn test_bloom_validation() {
        let mut args = base_args();
        args.dedup_shards = MAX_DEDUP_SHARDS + 1;
        assert!(matches!(
            ScanConfig::from_args(&args),
            Err(ConfigError::InvalidShardCount { .. })
        ));

        args.dedup_shards = 9;
        args.dedup_salts = 0;
        assert!(matches!(
            ScanConfig::from_args(&args),
            Err(ConfigError::InvalidSaltCount { .. })
        ));

        args.dedup_salts = 6;
        args.dedup_bits = 0xff;
        assert!(matches!(
            ScanConfig::from_args(&args),
            Err(ConfigError::InvalidBitWidth { .. })
        ));
    }

    #[test]
    fn test_bloom_geometry_ignored_for_exact() {
        let mut args = base_args();
        args.dedup = DedupStrategyArg::Exact;
        args.dedup_shards = 0;
        // invalid bloom geometry is irrelevant under the exact strategy
        let config = ScanConfig::from_args(&args).unwrap();
        assert_eq!(config.dedup, DedupStrategy::Exact);
    }

    #[test]
    fn test_clamp_bounds() {
        let mut args = base_args();
        args.clamp_min = Some(1_000_000);
        let config = ScanConfig::from_args(&args).unwrap();
        let bounds = config.clamp.unwrap();
        assert_eq!(bounds.min, 1_000_000);
        assert!(bounds.max > 1_000_000);

        args.clamp_min = Some(100);
        args.clamp_max = Some(50);
        assert!(matches!(
            ScanConfig::from_args(&args),
            Err(ConfigError::InvalidClampBounds { .. })
        ));
    }

    #[test]
    fn test_filters_and_flags_parse() {
        let args = CliArgs::parse_from([
            "scanfs", "/data", "-t", "4", "-f", ".snapshot", "-f", "lost+found", "-q", "-u",
        ]);
        let config = ScanConfig::from_args(&args).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.filters, vec![".snapshot", "lost+found"]);
        assert!(config.quiet);
        assert!(config.show_users);
    }
}
