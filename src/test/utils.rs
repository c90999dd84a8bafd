#[cfg(test)]
pub mod test_db {
    use crate::auth::{Role, User};
    use crate::db::{NewProgram, create_program, create_user, get_program, get_registration, get_user};
    use crate::error::AppError;
    use crate::models::{DeliveryChannel, Program, Registration};
    use crate::notifications::{
        LogTransport, NotificationDispatcher, NotificationEnvelope, NotificationError,
        NotificationTransport,
    };
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, Once};
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        programs: Vec<TestProgram>,
        file_connections: Option<u32>,
    }

    pub struct TestUser {
        pub email: String,
        pub display_name: String,
        pub phone: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestProgram {
        pub title: String,
        pub max_participants: i64,
        pub is_visible: bool,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn user(self, email: &str, display_name: &str) -> Self {
            self.user_with_role(email, display_name, Role::User, None)
        }

        pub fn instructor(self, email: &str, display_name: &str) -> Self {
            self.user_with_role(email, display_name, Role::Instructor, None)
        }

        pub fn center_admin(self, email: &str, display_name: &str) -> Self {
            self.user_with_role(email, display_name, Role::CenterAdmin, None)
        }

        pub fn super_admin(self, email: &str, display_name: &str) -> Self {
            self.user_with_role(email, display_name, Role::SuperAdmin, None)
        }

        pub fn user_with_role(
            mut self,
            email: &str,
            display_name: &str,
            role: Role,
            phone: Option<&str>,
        ) -> Self {
            self.users.push(TestUser {
                email: email.to_string(),
                display_name: display_name.to_string(),
                phone: phone.map(String::from),
                role,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn program(mut self, title: &str, max_participants: i64) -> Self {
            self.programs.push(TestProgram {
                title: title.to_string(),
                max_participants,
                is_visible: true,
            });
            self
        }

        pub fn hidden_program(mut self, title: &str, max_participants: i64) -> Self {
            self.programs.push(TestProgram {
                title: title.to_string(),
                max_participants,
                is_visible: false,
            });
            self
        }

        /// Backs the database with a temporary file so several pool
        /// connections can hold transactions at the same time.
        pub fn on_disk(mut self, connections: u32) -> Self {
            self.file_connections = Some(connections);
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            let (pool, file) = match self.file_connections {
                Some(connections) => {
                    let file = TempDbFile::new();
                    let options = SqliteConnectOptions::new()
                        .filename(&file.path)
                        .create_if_missing(true);
                    let pool = SqlitePoolOptions::new()
                        .max_connections(connections)
                        .connect_with(options)
                        .await?;
                    (pool, Some(file))
                }
                // A single connection keeps the in-memory database alive and shared
                None => {
                    let pool = SqlitePoolOptions::new()
                        .max_connections(1)
                        .connect("sqlite::memory:")
                        .await?;
                    (pool, None)
                }
            };

            crate::database::apply_schema(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut program_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.email,
                    &user.password,
                    &user.display_name,
                    user.phone.as_deref(),
                    user.role,
                )
                .await?;

                user_id_map.insert(user.email.clone(), user_id);
            }

            for program in &self.programs {
                let program_id = create_program(
                    &pool,
                    &NewProgram {
                        title: &program.title,
                        category: "safety",
                        duration: "2 days",
                        instructor: "Staff",
                        max_participants: program.max_participants,
                        is_visible: program.is_visible,
                    },
                )
                .await?;

                program_id_map.insert(program.title.clone(), program_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                program_id_map,
                _file: file,
            })
        }
    }

    struct TempDbFile {
        path: PathBuf,
    }

    impl TempDbFile {
        fn new() -> Self {
            let path = std::env::temp_dir()
                .join(format!("registrations-test-{}.db", uuid::Uuid::new_v4()));
            Self { path }
        }
    }

    impl Drop for TempDbFile {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let mut path = self.path.clone().into_os_string();
                path.push(suffix);
                let _ = std::fs::remove_file(path);
            }
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub program_id_map: HashMap<String, i64>,
        _file: Option<TempDbFile>,
    }

    impl TestDb {
        pub fn user_id(&self, email: &str) -> Option<i64> {
            self.user_id_map.get(email).copied()
        }

        pub fn program_id(&self, title: &str) -> Option<i64> {
            self.program_id_map.get(title).copied()
        }

        pub async fn user(&self, email: &str) -> User {
            let id = self.user_id(email).expect("User not in fixture");
            get_user(&self.pool, id).await.expect("Failed to load user")
        }

        pub async fn program(&self, title: &str) -> Program {
            let id = self.program_id(title).expect("Program not in fixture");
            get_program(&self.pool, id)
                .await
                .expect("Failed to load program")
        }

        pub async fn registration(&self, id: i64) -> Registration {
            get_registration(&self.pool, id)
                .await
                .expect("Failed to load registration")
        }

        pub fn dispatcher(&self) -> NotificationDispatcher {
            self.dispatcher_with(Arc::new(LogTransport::default()), DeliveryChannel::Email)
        }

        pub fn dispatcher_with(
            &self,
            transport: Arc<dyn NotificationTransport>,
            default_channel: DeliveryChannel,
        ) -> NotificationDispatcher {
            NotificationDispatcher::new(self.pool.clone(), transport, default_channel)
        }

        pub async fn notification_log_count(&self) -> i64 {
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications")
                .fetch_one(&self.pool)
                .await
                .expect("Failed to count notification log");
            count
        }

        pub async fn notification_log_count_with_status(&self, delivery_status: &str) -> i64 {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE delivery_status = ?")
                    .bind(delivery_status)
                    .fetch_one(&self.pool)
                    .await
                    .expect("Failed to count notification log");
            count
        }

        pub async fn notification_log_count_for(&self, user_id: i64) -> i64 {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_one(&self.pool)
                    .await
                    .expect("Failed to count notification log");
            count
        }

        pub async fn registration_count(&self, program_id: i64) -> i64 {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM registrations WHERE program_id = ?")
                    .bind(program_id)
                    .fetch_one(&self.pool)
                    .await
                    .expect("Failed to count registrations");
            count
        }
    }

    /// Captures deliveries instead of sending them.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub emails: Mutex<Vec<(String, String)>>,
        pub sms: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        pub fn email_recipients(&self) -> Vec<String> {
            self.emails
                .lock()
                .unwrap()
                .iter()
                .map(|(to, _)| to.clone())
                .collect()
        }

        pub fn sms_count(&self) -> usize {
            self.sms.lock().unwrap().len()
        }
    }

    #[rocket::async_trait]
    impl NotificationTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send_email(
            &self,
            to: &str,
            envelope: &NotificationEnvelope,
        ) -> Result<(), NotificationError> {
            self.emails
                .lock()
                .unwrap()
                .push((to.to_string(), envelope.title.clone()));
            Ok(())
        }

        async fn send_sms(
            &self,
            to: &str,
            envelope: &NotificationEnvelope,
        ) -> Result<(), NotificationError> {
            self.sms
                .lock()
                .unwrap()
                .push((to.to_string(), envelope.message.clone()));
            Ok(())
        }
    }

    /// Every delivery fails, as if the mail gateway were down.
    pub struct FailingTransport;

    #[rocket::async_trait]
    impl NotificationTransport for FailingTransport {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn send_email(
            &self,
            _to: &str,
            _envelope: &NotificationEnvelope,
        ) -> Result<(), NotificationError> {
            Err(NotificationError::DeliveryFailed(
                "SMTP connection refused".to_string(),
            ))
        }

        async fn send_sms(
            &self,
            _to: &str,
            _envelope: &NotificationEnvelope,
        ) -> Result<(), NotificationError> {
            Err(NotificationError::DeliveryFailed(
                "SMS gateway timeout".to_string(),
            ))
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::env::AppConfig;
    use crate::init_rocket;
    use crate::models::DeliveryChannel;
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    pub const USER: &str = "user@example.com";
    pub const SECOND_USER: &str = "second@example.com";
    pub const INSTRUCTOR: &str = "instructor@example.com";
    pub const CENTER_ADMIN: &str = "admin@example.com";
    pub const SUPER_ADMIN: &str = "root@example.com";

    pub const OPEN_PROGRAM: &str = "Forklift Safety";
    pub const SINGLE_SEAT_PROGRAM: &str = "First Aid";
    pub const HIDDEN_PROGRAM: &str = "Advanced Rigging";

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .user_with_role(USER, "Uma User", crate::auth::Role::User, Some("+1 555 000 1111"))
            .user(SECOND_USER, "Sam Second")
            .instructor(INSTRUCTOR, "Ivy Instructor")
            .center_admin(CENTER_ADMIN, "Ada Admin")
            .super_admin(SUPER_ADMIN, "Root Admin")
            .program(OPEN_PROGRAM, 10)
            .program(SINGLE_SEAT_PROGRAM, 1)
            .hidden_program(HIDDEN_PROGRAM, 5)
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            session_hours: 1,
            notify_channel: DeliveryChannel::Email,
            public_base_url: "http://localhost:8000".to_string(),
        }
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let dispatcher = test_db.dispatcher();
        let rocket = init_rocket(test_db.pool.clone(), dispatcher, test_config());

        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, email: &str) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": email,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        response.cookies().iter().cloned().collect()
    }
}
