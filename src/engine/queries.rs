use crate::auth::AdminToken;
use crate::model::*;

use super::calendar::project;
use super::{Engine, EngineError};

impl Engine {
    /// Pending requests with full contact details.
    pub async fn list_pending(&self, _token: &AdminToken) -> Result<Vec<Stay>, EngineError> {
        Ok(self.store.list_pending().await?)
    }

    pub async fn list_confirmed(&self, _token: &AdminToken) -> Result<Vec<Stay>, EngineError> {
        Ok(self.store.list_confirmed().await?)
    }

    pub async fn list_blocked(&self) -> Result<Vec<BlockedRange>, EngineError> {
        Ok(self.store.list_blocked().await?)
    }

    /// Public calendar: no names, emails or notes leave through here.
    pub async fn calendar(&self) -> Result<Vec<CalendarEvent>, EngineError> {
        let confirmed = self.store.list_confirmed().await?;
        let pending = self.store.list_pending().await?;
        let blocked = self.store.list_blocked().await?;
        Ok(project(&confirmed, &pending, &blocked))
    }
}
