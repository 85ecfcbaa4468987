use anyhow::{Context, bail};
use clap::Parser;
use randflake::SECRET_LEN;

/// Runtime configuration for the `randflake` binary.
///
/// Every flag falls back to an environment variable, which may in turn come
/// from a `.env` file in the working directory.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "randflake",
    version,
    about = "Emit or decode lease-coordinated, encrypted 64-bit IDs"
)]
pub struct CliArgs {
    /// PostgreSQL connection string for the shared lease table. Not needed
    /// with `--decode`.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Cipher secret: 16 raw bytes or 32 hex characters.
    ///
    /// All processes emitting IDs for one namespace must share it.
    ///
    /// Environment variable: `RANDFLAKE_SECRET`
    #[arg(long, env = "RANDFLAKE_SECRET", hide_env_values = true)]
    pub secret: String,

    /// Upper bound on pooled database connections.
    ///
    /// Environment variable: `MAX_CONNECTIONS`
    #[arg(long, env = "MAX_CONNECTIONS", default_value_t = 4)]
    pub max_connections: u32,

    /// Number of IDs to print, one per line.
    ///
    /// Environment variable: `COUNT`
    #[arg(short, long, env = "COUNT", default_value_t = 1)]
    pub count: u64,

    /// Print raw IDs instead of encrypted ones.
    ///
    /// Environment variable: `UNENCRYPTED`
    #[arg(long, env = "UNENCRYPTED", default_value_t = false)]
    pub unencrypted: bool,

    /// Print `raw encrypted` pairs.
    ///
    /// Environment variable: `PAIR`
    #[arg(long, env = "PAIR", default_value_t = false, conflicts_with = "unencrypted")]
    pub pair: bool,

    /// Decrypt this ID and print its fields instead of generating. Runs
    /// offline with only the secret.
    ///
    /// Environment variable: `DECODE`
    #[arg(long, env = "DECODE", allow_negative_numbers = true)]
    pub decode: Option<i64>,

    /// Create the lease table and index if missing before generating.
    ///
    /// Environment variable: `MIGRATE`
    #[arg(long, env = "MIGRATE", default_value_t = false, conflicts_with = "decode")]
    pub migrate: bool,

    /// Keep running after printing, renewing leases until Ctrl+C or SIGTERM.
    ///
    /// Environment variable: `HOLD`
    #[arg(long, env = "HOLD", default_value_t = false, conflicts_with = "decode")]
    pub hold: bool,
}

/// What the binary does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Generate { count: u64, output: Output },
    Decode { id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Encrypted,
    Unencrypted,
    Pair,
}

#[derive(Clone)]
pub struct CliConfig {
    /// Always set in [`Mode::Generate`].
    pub database_url: Option<String>,
    pub secret: [u8; SECRET_LEN],
    pub max_connections: u32,
    pub mode: Mode,
    pub migrate: bool,
    pub hold: bool,
}

impl core::fmt::Debug for CliConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CliConfig")
            .field("max_connections", &self.max_connections)
            .field("mode", &self.mode)
            .field("migrate", &self.migrate)
            .field("hold", &self.hold)
            .finish_non_exhaustive()
    }
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_connections == 0 {
            bail!("MAX_CONNECTIONS must be greater than 0");
        }

        let secret = parse_secret(&args.secret)?;

        let mode = match args.decode {
            Some(id) => {
                if args.hold || args.migrate {
                    bail!("--decode runs offline and cannot be combined with --hold or --migrate");
                }
                Mode::Decode { id }
            }
            None => {
                if args.database_url.as_deref().is_none_or(str::is_empty) {
                    bail!("DATABASE_URL must be set to generate IDs");
                }
                let output = if args.pair {
                    Output::Pair
                } else if args.unencrypted {
                    Output::Unencrypted
                } else {
                    Output::Encrypted
                };
                Mode::Generate {
                    count: args.count,
                    output,
                }
            }
        };

        Ok(Self {
            database_url: args.database_url,
            secret,
            max_connections: args.max_connections,
            mode,
            migrate: args.migrate,
            hold: args.hold,
        })
    }
}

/// Accepts exactly 16 raw bytes, or 32 hex characters encoding them.
fn parse_secret(raw: &str) -> anyhow::Result<[u8; SECRET_LEN]> {
    let bytes = if raw.len() == SECRET_LEN * 2 {
        hex::decode(raw).context("RANDFLAKE_SECRET is not valid hex")?
    } else {
        raw.as_bytes().to_vec()
    };

    <[u8; SECRET_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        anyhow::anyhow!(
            "RANDFLAKE_SECRET must be {} bytes or {} hex characters (got {} bytes)",
            SECRET_LEN,
            SECRET_LEN * 2,
            raw.len()
        )
    })
}
