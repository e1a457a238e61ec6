//! What travels down a pipeline.

use crate::Request;

/// The request being served. Stages may rewrite it before passing it on, as the
/// edge does when it maps `/` onto the root object.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}
