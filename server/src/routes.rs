//! The route table: every HTTP operation, its pattern, and the permission
//! it requires. `/health`, `/status` (and the `/ws` upgrade, wired in the
//! app) are public; everything else needs a bearer token.

use codex_agent_core::auth::SESSION_READ;

use crate::dispatch::Endpoint;
use crate::dispatch::endpoint;
use crate::handlers::bookmarks;
use crate::handlers::files;
use crate::handlers::groups;
use crate::handlers::meta;
use crate::handlers::queues;
use crate::handlers::sessions;
use crate::router::Router;

pub fn route_table() -> Router<Endpoint> {
    let mut router = Router::new();

    router.add("GET", "/health", endpoint(None, meta::health));
    router.add("GET", "/status", endpoint(None, meta::status));

    router.add(
        "GET",
        "/api/sessions",
        endpoint(Some(SESSION_READ), sessions::list_sessions),
    );
    router.add(
        "GET",
        "/api/sessions/search",
        endpoint(Some(SESSION_READ), sessions::search_sessions),
    );
    router.add(
        "GET",
        "/api/sessions/:id",
        endpoint(Some(SESSION_READ), sessions::get_session),
    );
    router.add(
        "GET",
        "/api/sessions/:id/search",
        endpoint(Some(SESSION_READ), sessions::search_session),
    );
    router.add(
        "GET",
        "/api/sessions/:id/events",
        endpoint(Some(SESSION_READ), sessions::session_events),
    );

    router.add(
        "GET",
        "/api/groups",
        endpoint(Some("group:read"), groups::list_groups),
    );
    router.add(
        "POST",
        "/api/groups",
        endpoint(Some("group:create"), groups::create_group),
    );
    router.add(
        "GET",
        "/api/groups/:id",
        endpoint(Some("group:read"), groups::get_group),
    );
    router.add(
        "DELETE",
        "/api/groups/:id",
        endpoint(Some("group:delete"), groups::delete_group),
    );
    router.add(
        "POST",
        "/api/groups/:id/sessions",
        endpoint(Some("group:update"), groups::add_group_sessions),
    );
    router.add(
        "DELETE",
        "/api/groups/:id/sessions/:sessionId",
        endpoint(Some("group:update"), groups::remove_group_session),
    );
    router.add(
        "POST",
        "/api/groups/:id/run",
        endpoint(Some("group:run"), groups::run_group_handler),
    );
    router.add(
        "POST",
        "/api/groups/:id/pause",
        endpoint(Some("group:update"), groups::pause_group),
    );
    router.add(
        "POST",
        "/api/groups/:id/resume",
        endpoint(Some("group:update"), groups::resume_group),
    );

    router.add(
        "GET",
        "/api/queues",
        endpoint(Some("queue:read"), queues::list_queues),
    );
    router.add(
        "POST",
        "/api/queues",
        endpoint(Some("queue:create"), queues::create_queue),
    );
    router.add(
        "GET",
        "/api/queues/:id",
        endpoint(Some("queue:read"), queues::get_queue),
    );
    router.add(
        "DELETE",
        "/api/queues/:id",
        endpoint(Some("queue:delete"), queues::delete_queue),
    );
    router.add(
        "POST",
        "/api/queues/:id/prompts",
        endpoint(Some("queue:update"), queues::add_prompt),
    );
    router.add(
        "PATCH",
        "/api/queues/:id/prompts/:promptId",
        endpoint(Some("queue:update"), queues::update_prompt),
    );
    router.add(
        "DELETE",
        "/api/queues/:id/prompts/:promptId",
        endpoint(Some("queue:update"), queues::remove_prompt),
    );
    router.add(
        "POST",
        "/api/queues/:id/prompts/:promptId/move",
        endpoint(Some("queue:update"), queues::move_prompt),
    );
    router.add(
        "POST",
        "/api/queues/:id/run",
        endpoint(Some("queue:run"), queues::run_queue_handler),
    );
    router.add(
        "POST",
        "/api/queues/:id/stop",
        endpoint(Some("queue:run"), queues::stop_queue),
    );
    router.add(
        "POST",
        "/api/queues/:id/pause",
        endpoint(Some("queue:update"), queues::pause_queue),
    );
    router.add(
        "POST",
        "/api/queues/:id/resume",
        endpoint(Some("queue:update"), queues::resume_queue),
    );

    router.add(
        "GET",
        "/api/files/find",
        endpoint(Some(SESSION_READ), files::find_file),
    );
    router.add(
        "GET",
        "/api/files/:id",
        endpoint(Some(SESSION_READ), files::session_files),
    );
    router.add(
        "POST",
        "/api/files/rebuild",
        endpoint(Some(SESSION_READ), files::rebuild_files),
    );

    router.add(
        "GET",
        "/api/bookmarks",
        endpoint(Some("bookmark:read"), bookmarks::list_bookmarks),
    );
    router.add(
        "POST",
        "/api/bookmarks",
        endpoint(Some("bookmark:create"), bookmarks::create_bookmark),
    );
    router.add(
        "GET",
        "/api/bookmarks/:id",
        endpoint(Some("bookmark:read"), bookmarks::get_bookmark),
    );
    router.add(
        "DELETE",
        "/api/bookmarks/:id",
        endpoint(Some("bookmark:delete"), bookmarks::delete_bookmark),
    );

    router
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_surface_route_resolves() {
        let table = route_table();
        let cases = [
            ("GET", "/health"),
            ("GET", "/status"),
            ("GET", "/api/sessions"),
            ("GET", "/api/sessions/search"),
            ("GET", "/api/sessions/abc"),
            ("GET", "/api/sessions/abc/search"),
            ("GET", "/api/sessions/abc/events"),
            ("GET", "/api/groups"),
            ("POST", "/api/groups"),
            ("GET", "/api/groups/g"),
            ("DELETE", "/api/groups/g"),
            ("POST", "/api/groups/g/sessions"),
            ("DELETE", "/api/groups/g/sessions/s"),
            ("POST", "/api/groups/g/run"),
            ("POST", "/api/groups/g/pause"),
            ("POST", "/api/groups/g/resume"),
            ("GET", "/api/queues"),
            ("POST", "/api/queues"),
            ("GET", "/api/queues/q"),
            ("DELETE", "/api/queues/q"),
            ("POST", "/api/queues/q/prompts"),
            ("PATCH", "/api/queues/q/prompts/p"),
            ("DELETE", "/api/queues/q/prompts/p"),
            ("POST", "/api/queues/q/prompts/p/move"),
            ("POST", "/api/queues/q/run"),
            ("POST", "/api/queues/q/stop"),
            ("POST", "/api/queues/q/pause"),
            ("POST", "/api/queues/q/resume"),
            ("GET", "/api/files/find"),
            ("GET", "/api/files/abc"),
            ("POST", "/api/files/rebuild"),
            ("GET", "/api/bookmarks"),
            ("POST", "/api/bookmarks"),
            ("GET", "/api/bookmarks/b"),
            ("DELETE", "/api/bookmarks/b"),
        ];
        for (method, path) in cases {
            assert!(
                table.match_route(method, path).is_some(),
                "{method} {path} should resolve"
            );
        }
        assert!(table.match_route("PUT", "/api/sessions").is_none());
        assert!(table.match_route("GET", "/api/tokens").is_none());
    }

    #[test]
    fn health_and_status_are_public_and_api_routes_are_gated() {
        let table = route_table();
        assert_eq!(
            table.match_route("GET", "/health").unwrap().handler.permission,
            None
        );
        assert_eq!(
            table.match_route("GET", "/status").unwrap().handler.permission,
            None
        );
        assert_eq!(
            table
                .match_route("GET", "/api/sessions")
                .unwrap()
                .handler
                .permission,
            Some(SESSION_READ)
        );
        assert_eq!(
            table
                .match_route("POST", "/api/groups/g/run")
                .unwrap()
                .handler
                .permission,
            Some("group:run")
        );
        assert_eq!(
            table
                .match_route("DELETE", "/api/bookmarks/b")
                .unwrap()
                .handler
                .permission,
            Some("bookmark:delete")
        );
    }

    #[test]
    fn literal_search_segment_wins_over_id_capture() {
        let table = route_table();
        let matched = table.match_route("GET", "/api/sessions/search").unwrap();
        assert!(matched.params.is_empty());
    }
}
