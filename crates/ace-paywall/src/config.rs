use std::path::PathBuf;

use bon::Builder;

/// Origin server configuration. Parsing (CLI, env) is the embedder's job.
#[derive(Builder, Debug, Clone)]
pub struct OriginConfig {
    /// TCP port served by [`serve`](crate::router::serve).
    #[builder(default = 8402)]
    pub port: u16,

    /// Price of one protected request, in micro-USDC.
    pub amount_microusdc: u64,

    /// HMAC secret binding issued challenges to this origin.
    #[builder(into)]
    pub challenge_secret: String,

    /// Validity window of issued challenges.
    #[builder(default = 300)]
    pub challenge_ttl_seconds: i64,

    /// Path of the JSON payment ledger file.
    #[builder(into)]
    pub ledger_path: PathBuf,

    /// Settlement network advertised in the x402 `accepts` entry. Advisory
    /// for this off-chain scheme.
    #[builder(into, default = "base".to_string())]
    pub network: String,

    /// Receiving address advertised in the x402 `accepts` entry.
    #[builder(into, default = "0x0000000000000000000000000000000000000000".to_string())]
    pub pay_to: String,
}
