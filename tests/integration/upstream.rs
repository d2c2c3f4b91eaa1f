//! Fake upstream services for integration testing.
//!
//! One `MockServer` plays the results page, the per-slot game API and the
//! notification service. `config()` returns an `AppConfig` pointing every
//! component at it.

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use diaria::config::AppConfig;

pub const NOTIFY_KEY_ENV: &str = "DIARIA_IT_NOTIFY_KEY";
pub const NOTIFY_KEY: &str = "integration-secret";

/// Results page: 4 Jan complete, 5 Jan with two slots drawn so far.
pub const RESULTS_PAGE: &str = r#"
<html><body>
  <section>
    <h3 class="fecha">Domingo, 5 Enero 2025</h3>
    <p><span class="numero">12</span> <span class="signo">3</span></p>
    <p><span class="numero">45</span> <span class="signo">1</span></p>
  </section>
  <section>
    <h3 class="fecha">Sábado, 4 Ene 2025</h3>
    <p><span class="numero">30</span> <span class="signo">2</span></p>
    <p><span class="numero">12</span> <span class="signo">5</span></p>
    <p><span class="numero">7</span> <span class="signo">9</span></p>
  </section>
  <section>
    <h3 class="fecha">Sin fecha</h3>
    <p><span class="numero">99</span> <span class="signo">9</span></p>
  </section>
</body></html>
"#;

pub struct Upstream {
    pub server: MockServer,
}

impl Upstream {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// The results page, served behind one redirect hop.
    pub async fn mount_results_page(&self, html: &str) {
        Mock::given(method("GET"))
            .and(path("/diaria"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/diaria/hoy"))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/diaria/hoy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_redirect_loop(&self, at: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", at))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_game(&self, site_game_id: &str, doc: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/site-games/{site_game_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(doc))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_broken_game(&self, site_game_id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/site-games/{site_game_id}")))
            .respond_with(ResponseTemplate::new(503))
            .mount(&self.server)
            .await;
    }

    /// Notification endpoint expecting exactly `calls` authenticated POSTs.
    pub async fn mount_notifier(&self, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/api/internal/draw-result"))
            .and(header("x-internal-api-key", NOTIFY_KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sent": 3})))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    pub fn config(&self) -> AppConfig {
        let uri = self.server.uri();
        let mut cfg = AppConfig::default();
        cfg.html.url = format!("{uri}/diaria");
        cfg.api.base_url = format!("{uri}/v1");
        cfg.notifier.url = format!("{uri}/api/internal/draw-result");
        cfg.notifier.api_key_env = NOTIFY_KEY_ENV.to_string();
        cfg.stats.periods = vec![30, 60];
        cfg
    }
}

/// A game document with a single session on `date`.
pub fn game(date: &str, main_label: &str, companion_label: &str) -> Value {
    json!({
        "game": {
            "score_layout": [
                [{"id": "m", "text": main_label}],
                [{"id": "x", "text": "Comodín"}],
                [{"id": "c", "text": companion_label}]
            ],
            "sessions": [
                {"date": date, "score": [["m", "x", "c"]]}
            ]
        }
    })
}
