#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<GameService>>,
    admin_token: Option<String>,
}
