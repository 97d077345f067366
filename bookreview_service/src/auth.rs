use std::collections::HashMap;
use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::error::ErrorUnauthorized;
use actix_web::{FromRequest, HttpRequest};

use crate::api::{Identity, UserId, USER_ID_HEADER, USER_NAME_HEADER};

fn identity_from_request(req: &HttpRequest) -> Result<Identity, actix_web::Error> {
    let id: UserId = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| ErrorUnauthorized("Missing or invalid user identity"))?;
    let name = req
        .headers()
        .get(USER_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ErrorUnauthorized("Missing user display name"))?;
    Ok(Identity {
        id,
        name: name.to_string(),
    })
}

/// The auth gateway in front of the service authenticates requests and
/// forwards the result in headers; this extractor turns them into a
/// request-scoped [`Identity`] and rejects requests that carry none.
impl FromRequest for Identity {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(identity_from_request(req))
    }
}

/// Display names of users seen on authenticated requests, used to join
/// owner and reviewer names into responses.
#[derive(Default)]
pub struct UsersDirectory {
    names: parking_lot::RwLock<HashMap<UserId, String>>,
}

impl UsersDirectory {
    pub fn record(&self, identity: &Identity) {
        self.names
            .write()
            .insert(identity.id, identity.name.clone());
    }

    pub fn display_name(&self, user_id: UserId) -> Option<String> {
        self.names.read().get(&user_id).cloned()
    }
}
