use serde::{Deserialize, Serialize};

// ============================================================================
// Change Notification Types
// ============================================================================

/// Body of a change-notification delivery.
///
/// The provider batches notifications under a top-level `value` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub value: Vec<Notification>,
}

/// One mailbox change as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    /// Resource path, e.g. `Users/{user}/Messages/{id}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Notification {
    /// Build a `created` notification for a message, as the provider would send it.
    pub fn message_created(
        user: &str,
        message_id: &str,
        client_state: &str,
        subscription_id: &str,
    ) -> Self {
        Notification {
            subscription_id: Some(subscription_id.to_string()),
            change_type: Some("created".to_string()),
            client_state: Some(client_state.to_string()),
            resource: Some(format!("Users/{}/Messages/{}", user, message_id)),
            resource_data: Some(ResourceData {
                id: Some(message_id.to_string()),
            }),
        }
    }

    /// Identifier of the message this notification refers to.
    ///
    /// Prefers `resourceData.id`; falls back to the trailing segment of
    /// `resource` when it has the shape `.../Messages/{id}`.
    pub fn resource_id(&self) -> Option<&str> {
        let from_data = self
            .resource_data
            .as_ref()
            .and_then(|data| data.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty());

        from_data.or_else(|| {
            let resource = self.resource.as_deref()?;
            let mut segments = resource.trim_end_matches('/').rsplitn(2, '/');
            let id = segments.next()?.trim();
            let collection = segments.next()?.rsplit('/').next()?;
            if collection.eq_ignore_ascii_case("messages") && !id.is_empty() {
                Some(id)
            } else {
                None
            }
        })
    }
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn alive() -> Self {
        StatusResponse {
            status: "alive".to_string(),
        }
    }
}

/// Response of the subscription renewal endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewResponse {
    pub status: String,
    pub renewed: usize,
}
