use crate::http::{BoxedBody, full_body, make_boxed_error_response};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::{Ready, ready};

/// Serves `/health` (always ok) and `/ready` (ok once `is_ready` returns true).
pub struct AdminService<F> {
    is_ready: F,
}

impl<F> AdminService<F>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self { is_ready }
    }
}

impl<F, B> Service<Request<B>> for AdminService<F>
where
    F: Fn() -> bool,
{
    type Response = Response<BoxedBody>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let res = match req.uri().path() {
            "/health" => Response::new(full_body("ok\n")),
            "/ready" => match (self.is_ready)() {
                true => Response::new(full_body("ok\n")),
                false => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            },
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        };
        ready(Ok(res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn get(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let ready_flag = Arc::new(AtomicBool::new(false));
        let flag = ready_flag.clone();
        let service = AdminService::new(move || flag.load(Ordering::Relaxed));

        let res = service.call(get("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = service.call(get("/ready")).await.unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

        ready_flag.store(true, Ordering::Relaxed);
        let res = service.call(get("/ready")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = service.call(get("/other")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
