use std::collections::HashMap;

use engine_logging::{engine_debug, engine_warn};

use crate::retry::call_with_backoff;
use crate::source::HarvestContext;

/// Per-run memo of user id to display name.
///
/// Each id is looked up at most once. A failed lookup caches the raw id so
/// serialization never stalls on the same user twice.
#[derive(Debug, Clone, Default)]
pub struct UserNameCache {
    names: HashMap<String, String>,
    lookups: usize,
}

impl UserNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(&mut self, ctx: HarvestContext<'_>, user_id: &str) -> String {
        if let Some(name) = self.names.get(user_id) {
            return name.clone();
        }

        self.lookups += 1;
        let operation = format!("users.info[{user_id}]");
        let source = ctx.source;
        let name = match call_with_backoff(&ctx.pacing.backoff, &ctx.pacing.lookup, &operation, || {
            source.user_info(user_id)
        })
        .await
        {
            Ok(info) if !info.display_name.is_empty() => info.display_name,
            Ok(_) => user_id.to_string(),
            Err(err) => {
                engine_warn!("{}: falling back to raw id: {}", operation, err);
                user_id.to_string()
            }
        };

        engine_debug!("{} -> {}", operation, name);
        self.names.insert(user_id.to_string(), name.clone());
        name
    }

    /// Source calls made so far.
    pub fn lookups(&self) -> usize {
        self.lookups
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
