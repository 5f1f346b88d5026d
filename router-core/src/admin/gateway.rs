//! Terminal `ProxyHttp` implementation for the admin surface. Never proxies
//! upstream — every request is answered directly from `AdminHandler`.

use crate::admin::handler::AdminHandler;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header, StatusCode};
use pingora::prelude::{HttpPeer, ProxyHttp, Session};
use pingora::{Custom, Error};
use pingora_http::ResponseHeader;
use std::sync::Arc;

pub struct AdminGateway {
    handler: Arc<AdminHandler>,
    admin_token: String,
}

impl AdminGateway {
    pub fn new(handler: Arc<AdminHandler>, admin_token: String) -> Self {
        Self {
            handler,
            admin_token,
        }
    }

    fn is_authorized(&self, session: &Session) -> bool {
        let Some(value) = session.req_header().headers.get(header::AUTHORIZATION) else {
            return false;
        };
        let Ok(value) = value.to_str() else {
            return false;
        };
        value
            .strip_prefix("Bearer ")
            .map(|token| token == self.admin_token)
            .unwrap_or(false)
    }

    async fn read_body(session: &mut Session) -> pingora::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    async fn write_json(
        session: &mut Session,
        status: StatusCode,
        body: Vec<u8>,
    ) -> pingora::Result<()> {
        let mut resp = ResponseHeader::build(status, None)?;
        resp.insert_header(header::CONTENT_TYPE, "application/json")?;
        resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;
        session.write_response_header(Box::new(resp), false).await?;
        session.write_response_body(Some(body.into()), true).await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyHttp for AdminGateway {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> pingora::Result<Box<HttpPeer>> {
        Err(Error::new(Custom("AdminGateway never proxies upstream")))
    }

    async fn request_filter(
        &self,
        session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> pingora::Result<bool> {
        if !self.is_authorized(session) {
            let body = serde_json::to_vec(&serde_json::json!({"error": "unauthorized"}))
                .unwrap_or_default();
            Self::write_json(session, StatusCode::UNAUTHORIZED, body).await?;
            return Ok(true);
        }

        let method = session.req_header().method.to_string();
        let path = session.req_header().uri.path().to_owned();
        let body = Self::read_body(session).await?;

        let (status, response_body) = self.handler.handle(&method, &path, &body);
        Self::write_json(session, status, response_body).await?;
        Ok(true)
    }
}
