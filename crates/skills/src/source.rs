//! The skill-content seam the `load_skill` built-in tool (spec §4.7)
//! depends on.
//!
//! File-system discovery — walking a skills directory, parsing
//! `SKILL.md` frontmatter, readiness gating on missing deps or
//! unsupported platforms — is explicitly out of scope (spec §1); that
//! scanning lives in whatever populates a `SkillSource` at startup.
//! This trait only covers what the tool needs once a registry exists:
//! wait for readiness, then fetch a skill's document body by name.

use crate::error::SkillError;

#[async_trait::async_trait]
pub trait SkillSource: Send + Sync {
    /// Blocks until the registry has completed its first population
    /// pass, so a `load_skill` call racing startup doesn't spuriously
    /// report "not found" (spec §9 "Skill registry ... explicit
    /// waitForInitialSync to avoid races").
    async fn wait_for_initial_sync(&self);

    /// Whether a skill with this id is known, regardless of readiness.
    fn exists(&self, skill_id: &str) -> bool;

    /// Reads the full content for a skill. Returns `NotFound` if the
    /// id is unknown or its content is unreadable.
    async fn read_content(&self, skill_id: &str) -> Result<String, SkillError>;
}
