//! shared-secret authentication for the admin surface (§4.6). the slave
//! protocol itself is unauthenticated, matching the source project; only
//! the operator-facing admin API gates on a secret.

use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::error::{ErrorForbidden, ErrorUnauthorized};
use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpRequest};

use crate::config::CONFIG;

/// required on every mutating admin call
pub struct AuthWrite;

impl FromRequest for AuthWrite {
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let header = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string);

        Box::pin(async move {
            let Some(configured) = &CONFIG.admin_secret else {
                return Err(ErrorForbidden("admin writes are disabled: no admin secret configured"));
            };

            let provided = header.ok_or_else(|| ErrorUnauthorized("no secret provided"))?;
            if provided == *configured {
                Ok(AuthWrite)
            } else {
                Err(ErrorForbidden("invalid secret"))
            }
        })
    }
}

/// required on read calls only when `allow_reads` is false
pub struct AuthRead;

impl FromRequest for AuthRead {
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        if CONFIG.allow_reads {
            Box::pin(async { Ok(AuthRead) })
        } else {
            let fut = AuthWrite::from_request(req, payload);
            Box::pin(async move {
                fut.await?;
                Ok(AuthRead)
            })
        }
    }
}
