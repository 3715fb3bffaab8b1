//! Path-parametric route table: segments with `:name` captures, matched on
//! (method, path). Pure data, independent of the serving stack, so dispatch
//! behavior is testable without a socket.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(segment.to_string()),
        })
        .collect()
}

struct Route<H> {
    method: String,
    segments: Vec<Segment>,
    handler: H,
}

#[derive(Default)]
pub struct Router<H> {
    routes: Vec<Route<H>>,
}

pub struct RouteMatch<'r, H> {
    pub handler: &'r H,
    pub params: HashMap<String, String>,
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn add(&mut self, method: &str, pattern: &str, handler: H) {
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            segments: parse_pattern(pattern),
            handler,
        });
    }

    /// First route winning on (method, path); `None` when nothing matches.
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch<'_, H>> {
        let method = method.to_ascii_uppercase();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        'routes: for route in &self.routes {
            if route.method != method || route.segments.len() != segments.len() {
                continue;
            }
            let mut params = HashMap::new();
            for (pattern, actual) in route.segments.iter().zip(&segments) {
                match pattern {
                    Segment::Literal(literal) => {
                        if literal != actual {
                            continue 'routes;
                        }
                    }
                    Segment::Param(name) => {
                        params.insert(name.clone(), (*actual).to_string());
                    }
                }
            }
            return Some(RouteMatch {
                handler: &route.handler,
                params,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn captures_named_params() {
        let mut router = Router::new();
        router.add("GET", "/api/sessions/:id", "get_session");
        let matched = router.match_route("GET", "/api/sessions/abc").unwrap();
        assert_eq!(*matched.handler, "get_session");
        assert_eq!(matched.params.get("id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn method_mismatch_is_none() {
        let mut router = Router::new();
        router.add("GET", "/api/sessions/:id", "h");
        assert!(router.match_route("POST", "/api/sessions/abc").is_none());
    }

    #[test]
    fn literal_segments_must_match_exactly() {
        let mut router = Router::new();
        router.add("GET", "/api/groups", "list");
        router.add("GET", "/api/groups/:id", "get");
        router.add("POST", "/api/groups/:id/run", "run");

        assert_eq!(
            *router.match_route("GET", "/api/groups").unwrap().handler,
            "list"
        );
        assert_eq!(
            *router.match_route("GET", "/api/groups/g1").unwrap().handler,
            "get"
        );
        let run = router.match_route("POST", "/api/groups/g1/run").unwrap();
        assert_eq!(*run.handler, "run");
        assert_eq!(run.params.get("id").map(String::as_str), Some("g1"));
        assert!(router.match_route("GET", "/api/queues").is_none());
        assert!(router.match_route("GET", "/api/groups/g1/run").is_none());
    }

    #[test]
    fn multiple_params_capture_independently() {
        let mut router = Router::new();
        router.add("DELETE", "/api/queues/:id/prompts/:promptId", "rm");
        let matched = router
            .match_route("DELETE", "/api/queues/q1/prompts/p9")
            .unwrap();
        assert_eq!(matched.params.get("id").map(String::as_str), Some("q1"));
        assert_eq!(
            matched.params.get("promptId").map(String::as_str),
            Some("p9")
        );
    }

    #[test]
    fn trailing_slash_is_tolerated() {
        let mut router = Router::new();
        router.add("GET", "/api/bookmarks", "list");
        assert!(router.match_route("GET", "/api/bookmarks/").is_some());
    }
}
