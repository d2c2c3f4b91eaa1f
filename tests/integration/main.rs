//! End-to-end tests: wiremock upstreams → pipeline → in-memory SQLite.

mod scrape_run;
mod upstream;
