//! Network-level constants: built-in contracts and the fastsync registry.

/// Contracts deployed at genesis (the name service).
pub const BUILTIN_SCIDS: &[&str] =
    &["0000000000000000000000000000000000000000000000000000000000000001"];

/// Registry contract that publishes previously indexed contracts on mainnet.
pub const MAINNET_REGISTRY_SCID: &str =
    "a05395bb0cf77adc850928b0db00eb5ca7a9ccbafd9a38d021c8d299ad5ce1a4";

/// Registry contract on testnet.
pub const TESTNET_REGISTRY_SCID: &str =
    "df3a698af94afb46e7f6de40bbb628df2e10f29f79900928524d97f30a1928a2";

/// Registry variable that holds the armored signature over its own code.
pub const REGISTRY_SIGNATURE_KEY: &str = "signature";

/// Length of a hex contract id.
pub const SCID_LEN: usize = 64;

/// Registry key suffixes: `<scid>owner` and `<scid>height`.
pub const OWNER_SUFFIX: &str = "owner";
pub const HEIGHT_SUFFIX: &str = "height";

/// Registry contract id for the given network.
pub fn registry_scid(testnet: bool) -> &'static str {
    if testnet {
        TESTNET_REGISTRY_SCID
    } else {
        MAINNET_REGISTRY_SCID
    }
}

pub fn is_builtin(scid: &str) -> bool {
    BUILTIN_SCIDS.contains(&scid)
}
