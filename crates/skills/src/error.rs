#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("skill not found: {0}")]
    NotFound(String),
    #[error("failed to read skill content for {skill_id}: {message}")]
    ReadFailed { skill_id: String, message: String },
}
