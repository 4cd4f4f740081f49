// Helpers for building multipart requests in tests.

use axum::{body::Body, extract::Request, http::header};

const BOUNDARY: &str = "proc2apiboundary";

pub struct TestPart<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    content: &'a [u8],
}

// Plain form field
pub fn field<'a>(name: &'a str, content: &'a [u8]) -> TestPart<'a> {
    TestPart {
        name,
        file_name: None,
        content,
    }
}

// File upload
pub fn upload<'a>(name: &'a str, file_name: &'a str, content: &'a [u8]) -> TestPart<'a> {
    TestPart {
        name,
        file_name: Some(file_name),
        content,
    }
}

pub fn multipart_body(parts: &[TestPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let disposition = match part.file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                part.name, file_name
            ),
            None => format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                part.name
            ),
        };
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(part.content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(parts: &[TestPart<'_>]) -> Request {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}
