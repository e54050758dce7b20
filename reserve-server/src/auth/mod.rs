//! 请求方身份
//!
//! 身份认证由上游网关完成，本服务只消费网关透传的用户头：
//! `x-user-id`（数字 ID）与 `x-user-name`。两者皆可缺省 —— 匿名
//! 提交属于正常流程，落库时以 "anonymous" 作为操作者。

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Acting user as forwarded by the gateway.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Numeric user ID; `None` for anonymous submissions
    pub id: Option<i64>,
    pub display_name: Option<String>,
}

impl CurrentUser {
    /// Audit-trail actor string.
    pub fn actor(&self) -> String {
        match (self.id, &self.display_name) {
            (Some(id), _) => id.to_string(),
            (None, Some(name)) if !name.is_empty() => name.clone(),
            _ => "anonymous".to_string(),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let display_name = parts
            .headers
            .get("x-user-name")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(CurrentUser { id, display_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_prefers_id_then_name() {
        let user = CurrentUser {
            id: Some(42),
            display_name: Some("Alice".into()),
        };
        assert_eq!(user.actor(), "42");

        let named = CurrentUser {
            id: None,
            display_name: Some("Alice".into()),
        };
        assert_eq!(named.actor(), "Alice");

        let anonymous = CurrentUser {
            id: None,
            display_name: None,
        };
        assert_eq!(anonymous.actor(), "anonymous");
    }
}
