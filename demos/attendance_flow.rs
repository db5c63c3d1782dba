//! Attendance flow example for rollcall-store
//!
//! Walks through one complete roll call against a live Redis server: a session is opened, a
//! handful of students redeem access tokens and submit the form, one of them tries to submit
//! twice and another replays a spent token, and finally the session is exported and closed.
//!
//! # Running the example
//!
//! 1. Make sure you have Redis 7 or later running
//! 2. Optionally point the example at it (defaults to `redis://127.0.0.1:6379/0`):
//!    ```bash
//!    export ROLLCALL__REDIS__URL=redis://127.0.0.1:6379/0
//!    ```
//! 3. Run the example:
//!    ```bash
//!    cargo run --example attendance_flow
//!    ```

use dotenvy::dotenv;
use rollcall_store::{telemetry, Error, Rollcall, Settings, StudentRecord};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv().ok();
    telemetry::init();

    let settings = Settings::load()?;
    let rollcall = Rollcall::connect(&settings).await?;

    let session_id = rollcall.open_session().await?;
    info!(session_id = %session_id, "scan the QR code for this session");

    let students = [
        ("1001", "Ada", "Lovelace"),
        ("1002", "Alan", "Turing"),
        ("1003", "Grace", "Hopper"),
    ];

    for (school_no, name, surname) in students {
        let token = rollcall.issue_access_token(&session_id).await?;
        rollcall.redeem_access_token(&session_id, &token).await?;

        let record = StudentRecord {
            name: name.to_string(),
            surname: surname.to_string(),
            school_no: school_no.to_string(),
            faculty: "Engineering".to_string(),
            section: "A".to_string(),
        };
        rollcall
            .submit_attendance(&session_id, school_no, &record)
            .await?;

        // A replayed form link is refused.
        match rollcall.redeem_access_token(&session_id, &token).await {
            Err(Error::TokenInvalid) => info!(school_no, "replayed token refused"),
            other => info!(school_no, outcome = ?other, "unexpected replay outcome"),
        }
    }

    // A second submission from the same student is refused.
    let again = StudentRecord {
        name: "Ada".to_string(),
        surname: "Byron".to_string(),
        school_no: "1001".to_string(),
        faculty: "Engineering".to_string(),
        section: "A".to_string(),
    };
    if let Err(err) = rollcall.submit_attendance(&session_id, "1001", &again).await {
        info!(kind = ?err.kind(), "{err}");
    }

    let records = rollcall.finalize::<StudentRecord>(&session_id).await?;
    for (school_no, record) in &records {
        info!(
            school_no = %school_no,
            name = %record.payload.name,
            surname = %record.payload.surname,
            submitted_at = %record.submitted_at,
            "attendance"
        );
    }

    info!(
        session_id = %session_id,
        open = rollcall.session_is_open(&session_id).await,
        "roll call finished"
    );

    Ok(())
}
