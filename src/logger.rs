//! Access log middleware: one line per request once the handler is done.

use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use rama::{
    Layer, Service,
    extensions::ExtensionsMut,
    http::{Body, Request, Response, StatusCode},
};
use tracing::info;

/// Status of a request as reported by its handler. The first recorded value wins.
#[derive(Debug, Clone, Default)]
pub struct StatusRecorder(Arc<OnceLock<StatusCode>>);

impl StatusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `status` unless a status was already recorded.
    pub fn record(&self, status: StatusCode) {
        let _ = self.0.set(status);
    }

    /// Recorded status, `200 OK` when the handler never reported one.
    pub fn status(&self) -> StatusCode {
        self.0.get().copied().unwrap_or(StatusCode::OK)
    }
}

/// Wraps a service and logs elapsed time, status and target for every request.
#[derive(Debug, Clone)]
pub struct RequestLogger<S> {
    inner: S,
}

impl<S> RequestLogger<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> Service<Request<Body>> for RequestLogger<S>
where
    S: Service<Request<Body>, Output = Response<Body>>,
{
    type Output = S::Output;
    type Error = S::Error;

    async fn serve(&self, mut req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let start = Instant::now();
        let target = req.uri().to_string();
        let recorder = StatusRecorder::new();
        req.extensions_mut().insert(recorder.clone());

        let result = self.inner.serve(req).await;
        match &result {
            Ok(resp) => recorder.record(resp.status()),
            Err(_) => recorder.record(StatusCode::INTERNAL_SERVER_ERROR),
        }

        let elapsed = start.elapsed();
        let status = recorder.status();
        info!(
            status = status.as_u16(),
            elapsed_ms = elapsed_millis(elapsed),
            request_target = %target,
            "{}",
            format_access_line(elapsed, status, &target)
        );
        result
    }
}

/// [`Layer`] producing a [`RequestLogger`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLoggerLayer;

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLogger<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogger::new(inner)
    }
}

/// Whole milliseconds in `elapsed`, saturating at `u64::MAX`.
pub fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// `<seconds>s <status> <target>` with millisecond precision.
pub fn format_access_line(elapsed: Duration, status: StatusCode, target: &str) -> String {
    format!("{:.3}s {} {}", elapsed.as_secs_f64(), status.as_u16(), target)
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use rama::{error::BoxError, extensions::ExtensionsRef};
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[test]
    fn unrecorded_status_defaults_to_ok() {
        assert_eq!(StatusRecorder::new().status(), StatusCode::OK);
    }

    #[test]
    fn first_recorded_status_wins() {
        let recorder = StatusRecorder::new();
        recorder.record(StatusCode::NOT_FOUND);
        recorder.record(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(recorder.status(), StatusCode::NOT_FOUND);

        let shared = recorder.clone();
        shared.record(StatusCode::OK);
        assert_eq!(recorder.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn access_line_format() {
        assert_eq!(
            format_access_line(
                Duration::from_millis(1234),
                StatusCode::OK,
                "/golang.org/x/mod/@v/list"
            ),
            "1.234s 200 /golang.org/x/mod/@v/list"
        );
        assert_eq!(
            format_access_line(Duration::ZERO, StatusCode::FORBIDDEN, "/a.com/b/@latest"),
            "0.000s 403 /a.com/b/@latest"
        );
    }

    #[test]
    fn elapsed_millis_saturates() {
        assert_eq!(elapsed_millis(Duration::from_micros(2_500)), 2);
        assert_eq!(elapsed_millis(Duration::MAX), u64::MAX);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Records two statuses through the request extension, then answers 500.
    struct Recording;

    impl Service<Request<Body>> for Recording {
        type Output = Response<Body>;
        type Error = BoxError;

        async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
            if let Some(recorder) = req.extensions().get::<StatusRecorder>() {
                recorder.record(StatusCode::NOT_FOUND);
                recorder.record(StatusCode::INTERNAL_SERVER_ERROR);
            }
            Ok(Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())?)
        }
    }

    struct Silent;

    impl Service<Request<Body>> for Silent {
        type Output = Response<Body>;
        type Error = BoxError;

        async fn serve(&self, _req: Request<Body>) -> Result<Self::Output, Self::Error> {
            Ok(Response::new(Body::empty()))
        }
    }

    struct Broken;

    impl Service<Request<Body>> for Broken {
        type Output = Response<Body>;
        type Error = BoxError;

        async fn serve(&self, _req: Request<Body>) -> Result<Self::Output, Self::Error> {
            Err("boom".into())
        }
    }

    fn req(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn logged<S>(svc: S, path: &str) -> String
    where
        S: Service<Request<Body>, Output = Response<Body>>,
    {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let _ = RequestLoggerLayer.into_layer(svc).serve(req(path)).await;
        captured.text()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn logs_first_status_recorded_by_handler() {
        let out = logged(Recording, "/a.com/b/@v/list").await;
        assert!(out.contains(" 404 /a.com/b/@v/list"), "{out}");
        assert!(out.contains("status=404"), "{out}");
        assert!(out.contains("elapsed_ms="), "{out}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn logs_response_status_when_handler_records_nothing() {
        let out = logged(Silent, "/a.com/b/@latest").await;
        assert!(out.contains(" 200 /a.com/b/@latest"), "{out}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn logs_internal_error_for_failed_service() {
        let out = logged(Broken, "/a.com/b/@v/v1.0.0.zip").await;
        assert!(out.contains(" 500 /a.com/b/@v/v1.0.0.zip"), "{out}");
    }
}
