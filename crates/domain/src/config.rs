//! Runtime configuration defaults (spec §6 "Config defaults").
//!
//! A plain struct constructed once at process startup and threaded
//! through the runtime by parameter, centralizing tunables rather than
//! scattering literals through the call sites that use them.

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub turn_limit: u32,
    pub hitl_timeout_ms: u64,
    pub shell_timeout_ms: u64,
    pub shell_history_cap: usize,
    pub shell_tool_batch_size: usize,
    pub memory_window: usize,
    pub chat_title_max_len: usize,
    pub mcp_tools_list_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            turn_limit: 5,
            hitl_timeout_ms: 120_000,
            shell_timeout_ms: 600_000,
            shell_history_cap: 2000,
            shell_tool_batch_size: 10,
            memory_window: 10,
            chat_title_max_len: 100,
            mcp_tools_list_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.turn_limit, 5);
        assert_eq!(cfg.hitl_timeout_ms, 120_000);
        assert_eq!(cfg.shell_timeout_ms, 600_000);
        assert_eq!(cfg.shell_history_cap, 2000);
        assert_eq!(cfg.shell_tool_batch_size, 10);
        assert_eq!(cfg.memory_window, 10);
        assert_eq!(cfg.chat_title_max_len, 100);
        assert_eq!(cfg.mcp_tools_list_timeout_ms, 5_000);
    }
}
