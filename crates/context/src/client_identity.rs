/// Identifies the organization on whose behalf a request is dispatched.
///
/// This is deliberately thin: the gateway core treats organization/project/user
/// management as an external collaborator and only needs enough identity to look
/// up a credential and tag a log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationContext {
    pub organization_id: String,
    /// When `true`, a missing organization-owned key for a provider falls back
    /// to a platform-owned key instead of failing with `no_credential`.
    pub allow_credits_mode: bool,
}

impl Default for OrganizationContext {
    fn default() -> Self {
        Self::new("anonymous")
    }
}

impl OrganizationContext {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            allow_credits_mode: false,
        }
    }

    pub fn with_credits_mode(mut self, allow: bool) -> Self {
        self.allow_credits_mode = allow;
        self
    }
}
