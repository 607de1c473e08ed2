//! Connector that opens one WebSocket per server session.

use async_trait::async_trait;
use tandem_protocol::ChannelKind;
use url::Url;

use super::client::WsTransport;
use crate::ports::outbound::{Connector, Transport, TransportError};

/// Joins sessions at `<base>/<kind>/<session id>`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base_url: Url,
}

impl WsConnector {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn session_url(&self, kind: ChannelKind, session_id: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TransportError::ConnectFailed(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .push(kind.as_str())
            .push(session_id);
        Ok(url)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn join(
        &self,
        kind: ChannelKind,
        session_id: &str,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let url = self.session_url(kind, session_id)?;
        tracing::debug!(channel = %kind, session_id, url = %url, "Joining session");
        let transport = WsTransport::connect(kind, &url).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_appends_kind_and_id() {
        let connector = WsConnector::new("ws://localhost:3000/ws/").unwrap();
        let url = connector.session_url(ChannelKind::Activity, "battle-1").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws/activity/battle-1");

        let url = connector.session_url(ChannelKind::World, "lobby 2").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws/world/lobby%202");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(WsConnector::new("not a url").is_err());
    }
}
