// Request handler of a hosted server

use super::SharedServer;
use crate::{
    error::GatewayError,
    params::{ResolvedParameters, resolve_parameters},
};
use axum::{
    body::HttpBody,
    extract::{FromRequest, Multipart, Request, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use tracing::{error, info};
use uuid::Uuid;

// --- POST / ---
// Runs the configured command with the submitted form and responds with its output
pub async fn submit(State(server): State<SharedServer>, request: Request) -> Response {
    let request_id = Uuid::new_v4();
    info!(
        "Submission received: server={}, request_id={}, free process slots={}",
        server.config.server_name,
        request_id,
        server.invoker.available_slots()
    );

    match process_submission(&server, request).await {
        Ok(response) => {
            info!("Submission completed: request_id={}", request_id);
            response
        }
        Err(err) => {
            error!("Submission failed: request_id={}, error={}", request_id, err);
            err.into_response()
        }
    }
}

async fn process_submission(
    server: &SharedServer,
    request: Request,
) -> Result<Response, GatewayError> {
    let config = &server.config;

    // An empty body has no boundary to parse but is a submission without parts
    let empty_body = request.body().is_end_stream();
    let multipart = Multipart::from_request(request, &()).await?;
    let resolved = if empty_body {
        ResolvedParameters::default()
    } else {
        resolve_parameters(multipart, config).await?
    };

    // Output of a failed invocation is dropped together with this buffer
    let mut output = Vec::new();
    server
        .invoker
        .submit(
            &resolved.arguments,
            &resolved.stdin,
            config.output_type,
            &mut output,
        )
        .await?;

    // Headers are only set once the output is complete
    let disposition = attachment_disposition(&resolved.output_filename(&config.output_filename))?;

    Ok((
        TypedHeader(ContentType::from(config.output_content_type.clone())),
        [(header::CONTENT_DISPOSITION, disposition)],
        output,
    )
        .into_response())
}

// `attachment; filename=...`, quoting the filename unless it is a plain token
fn attachment_disposition(filename: &str) -> Result<HeaderValue, GatewayError> {
    let is_token = !filename.is_empty()
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c));

    let value = if is_token {
        format!("attachment; filename={}", filename)
    } else {
        let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
        format!("attachment; filename=\"{}\"", escaped)
    };

    HeaderValue::from_str(&value).map_err(|e| {
        GatewayError::Validation(format!("Invalid output filename '{}': {}", filename, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{OutputOverride, OutputType, ParameterSpec, ServerConfig},
        test_support::{field, multipart_request, upload},
        web::{ServerContext, create_app},
    };
    use axum::{body::Body, http::StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn server_config(command: &[&str], parameters: Vec<ParameterSpec>) -> ServerConfig {
        ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
            path_restrict: "/".to_string(),
            command: command.iter().map(|token| token.to_string()).collect(),
            parameters,
            output_type: OutputType::String,
            output_filename: "result.txt".to_string(),
            output_content_type: mime::TEXT_PLAIN_UTF_8,
            server_name: "example.com".to_string(),
            server_location: "/".to_string(),
        }
    }

    async fn send(
        config: ServerConfig,
        request: Request,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let app = create_app(Arc::new(ServerContext::new(config)));
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("result.txt").unwrap(),
            "attachment; filename=result.txt"
        );
        assert_eq!(
            attachment_disposition("my report.pdf").unwrap(),
            "attachment; filename=\"my report.pdf\""
        );
        assert_eq!(
            attachment_disposition("a\"b.txt").unwrap(),
            "attachment; filename=\"a\\\"b.txt\""
        );
        assert_eq!(
            attachment_disposition("").unwrap(),
            "attachment; filename=\"\""
        );
        assert!(attachment_disposition("bad\nname").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_hello() {
        let config = server_config(&["echo", "hello"], vec![]);
        let (status, headers, body) =
            send(config, multipart_request(&[field("ignored", b"value")])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello\n");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=result.txt"
        );
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_submission_without_parts() {
        let config = server_config(&["echo", "hello"], vec![]);
        let (status, _, body) = send(config, multipart_request(&[])).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_multipart_body() {
        let config = server_config(&["echo", "hello"], vec![]);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::empty())
            .unwrap();

        let (status, headers, body) = send(config, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello\n");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=result.txt"
        );
    }

    #[tokio::test]
    async fn test_empty_body_without_multipart_type_fails() {
        let config = server_config(&["echo", "unused"], vec![]);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let (status, _, _) = send(config, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parameters_and_stdin_reach_process() {
        let parameters = vec![
            ParameterSpec {
                form: "name".to_string(),
                process: Some("--name".to_string()),
                ..Default::default()
            },
            ParameterSpec {
                form: "body".to_string(),
                stdin: true,
                ..Default::default()
            },
        ];
        let config = server_config(
            &["sh", "-c", "printf '%s %s|' \"$0\" \"$1\"; cat", "--placeholder"],
            parameters,
        );
        // sh -c script $0 $1...: "--placeholder" becomes $0, the appended flag $1
        let (status, _, body) = send(
            config,
            multipart_request(&[field("name", b"world"), field("body", b"from stdin")]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "--placeholder --name|from stdin"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_override_sets_filename() {
        let parameters = vec![
            ParameterSpec {
                form: "document".to_string(),
                stdin: true,
                ..Default::default()
            },
            ParameterSpec {
                form: "format".to_string(),
                process: Some("--format".to_string()),
                output_override: vec![OutputOverride {
                    value: "html".to_string(),
                    output_filename: "$originalFilename$.html".to_string(),
                }],
                ..Default::default()
            },
        ];
        let mut config = server_config(&["sh", "-c", "cat"], parameters);
        config.output_type = OutputType::Binary;
        config.output_filename = "converted-$outputFilename$".to_string();
        config.output_content_type = mime::TEXT_HTML;

        let (status, headers, body) = send(
            config,
            multipart_request(&[
                upload("document", "notes.md", b"<p>hi</p>"),
                field("format", b"html"),
            ]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<p>hi</p>");
        assert_eq!(headers[header::CONTENT_TYPE], "text/html");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=converted-notes.html"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let root = tempfile::TempDir::new().unwrap();
        let data = root.path().join("data");
        std::fs::create_dir(&data).unwrap();
        std::fs::write(root.path().join("passwd"), "root:x:0:0").unwrap();

        let parameters = vec![ParameterSpec {
            form: "file".to_string(),
            process: Some("--file".to_string()),
            verify_path: true,
            ..Default::default()
        }];
        let mut config = server_config(&["cat"], parameters);
        config.path_restrict = data.to_string_lossy().into_owned();

        let value = format!("{}/../passwd", data.display());
        let (status, headers, body) =
            send(config, multipart_request(&[field("file", value.as_bytes())])).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(headers.get(header::CONTENT_DISPOSITION).is_none());
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("Processing request was not successful."));
        assert!(!body.contains("root:x"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_upload_reports_sizes() {
        let parameters = vec![ParameterSpec {
            form: "upload".to_string(),
            stdin: true,
            ..Default::default()
        }];
        let config = server_config(&["cat"], parameters);
        let content = vec![b'x'; 600 * 1024];

        let (status, headers, body) = send(
            config,
            multipart_request(&[upload("upload", "big.bin", &content)]),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("Submitted content is bigger than size limit (500kB maximum, "));
        assert!(body.contains("kB received)."));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_process_gives_generic_page() {
        let config = server_config(&["sh", "-c", "echo partial output; exit 1"], vec![]);
        let (status, headers, body) =
            send(config, multipart_request(&[field("ignored", b"")])).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(headers.get(header::CONTENT_DISPOSITION).is_none());
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("Processing request was not successful."));
        assert!(!body.contains("partial output"));
    }

    #[tokio::test]
    async fn test_non_multipart_request_gives_generic_page() {
        let config = server_config(&["echo", "unused"], vec![]);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let (status, _, body) = send(config, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8(body)
            .unwrap()
            .contains("Processing request was not successful."));
    }

    #[tokio::test]
    async fn test_get_is_not_routed() {
        let config = server_config(&["echo", "unused"], vec![]);
        let request = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let (status, _, _) = send(config, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
