//! Configuration of the debug port bring-up.

use serde::{Deserialize, Serialize};

/// Tunables for debug port initialisation and target discovery.
///
/// All fields have defaults which work for the vast majority of targets, so a
/// configuration file only needs to mention what it wants to change:
///
/// ```
/// # use probe_rs_adiv5::AdiConfig;
/// let config: AdiConfig = serde_yaml::from_str("connect_under_reset: true").unwrap();
/// assert_eq!(config.halt_timeout_ms, 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdiConfig {
    /// nRST is held asserted while connecting.
    ///
    /// Cores are left halted after discovery, and the halt negotiation returns
    /// as soon as it observes the core in reset.
    pub connect_under_reset: bool,
    /// How long to wait for the debug and system power domains to acknowledge
    /// a power-up request, in milliseconds.
    pub power_up_timeout_ms: u32,
    /// How long to try halting a Cortex-M core before discovery, in milliseconds.
    pub halt_timeout_ms: u32,
    /// Poll interval while waiting for the debug reset acknowledge, in milliseconds.
    pub debug_reset_poll_ms: u32,
    /// ROM tables nested deeper than this are not followed.
    pub max_rom_table_depth: usize,
}

impl Default for AdiConfig {
    fn default() -> Self {
        Self {
            connect_under_reset: false,
            power_up_timeout_ms: 201,
            halt_timeout_ms: 2000,
            debug_reset_poll_ms: 20,
            max_rom_table_depth: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AdiConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_gives_defaults() {
        let config: AdiConfig = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config, AdiConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config: AdiConfig = serde_yaml::from_str(
            "halt_timeout_ms: 500\nmax_rom_table_depth: 4\n",
        )
        .unwrap();

        assert_eq!(config.halt_timeout_ms, 500);
        assert_eq!(config.max_rom_table_depth, 4);
        assert_eq!(config.power_up_timeout_ms, 201);
        assert!(!config.connect_under_reset);
    }
}
