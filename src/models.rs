use serde::Serialize;

#[derive(Serialize)]
pub struct UploadOutcome {
    pub success: bool,
}

impl UploadOutcome {
    pub fn ok() -> Self {
        Self { success: true }
    }

    pub fn failed() -> Self {
        Self { success: false }
    }
}
