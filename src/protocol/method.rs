//! Request method codes carried by `METHOD` packets.
//!
//! GET is the default and is never sent on the wire.

use http::Method;

const TABLE: &[(u32, &str)] = &[
    (1, "HEAD"),
    (2, "GET"),
    (3, "POST"),
    (4, "PUT"),
    (5, "DELETE"),
    (6, "OPTIONS"),
    (7, "TRACE"),
    (8, "PROPFIND"),
    (9, "PROPPATCH"),
    (10, "MKCOL"),
    (11, "COPY"),
    (12, "MOVE"),
    (13, "LOCK"),
    (14, "UNLOCK"),
    (15, "PATCH"),
];

/// Wire code for `method`, or `None` if WAS cannot express it.
pub fn method_code(method: &Method) -> Option<u32> {
    TABLE
        .iter()
        .find(|(_, name)| *name == method.as_str())
        .map(|(code, _)| *code)
}

pub fn method_from_code(code: u32) -> Option<Method> {
    TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .and_then(|(_, name)| Method::from_bytes(name.as_bytes()).ok())
}

/// Methods whose response never carries a body.
pub fn method_is_empty(method: &Method) -> bool {
    *method == Method::HEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_methods() {
        assert_eq!(method_code(&Method::GET), Some(2));
        assert_eq!(method_code(&Method::POST), Some(3));
        assert_eq!(method_from_code(4), Some(Method::PUT));
    }

    #[test]
    fn webdav_methods() {
        let propfind = Method::from_bytes(b"PROPFIND").unwrap();
        assert_eq!(method_code(&propfind), Some(8));
        assert_eq!(method_from_code(8), Some(propfind));
    }

    #[test]
    fn unknown_methods() {
        assert_eq!(method_from_code(0), None);
        assert_eq!(method_from_code(99), None);
        let custom = Method::from_bytes(b"PURGE").unwrap();
        assert_eq!(method_code(&custom), None);
    }
}
