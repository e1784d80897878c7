use crate::db;
use crate::domain::models::QuestionType;
use crate::domain::survey::{QuestionInput, SurveyInput};
use anyhow::Result;
use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2,
};
use rand_core::OsRng;
use sqlx::PgPool;

pub const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo-password";

struct SeedQuestion<'a> {
    text: &'a str,
    qtype: QuestionType,
    options: &'a [&'a str],
    required: bool,
}

/// Creates the demo account with one published sample survey.
/// Does nothing when the demo account already exists.
pub async fn seed_demo(pool: &PgPool) -> Result<()> {
    if db::find_user_by_email(pool, DEMO_EMAIL).await?.is_some() {
        tracing::debug!("Demo account already present, skipping seed");
        return Ok(());
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(DEMO_PASSWORD.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash demo password: {e}"))?
        .to_string();
    let user = db::create_user(pool, DEMO_EMAIL, &hash, "Demo").await?;

    let survey = db::create_survey(
        pool,
        user.id,
        &SurveyInput {
            title: "Team retrospective".to_string(),
            description: Some("A short sample survey to show how responses flow in.".to_string()),
        },
    )
    .await?;

    let questions = [
        SeedQuestion {
            text: "How would you rate the last sprint?",
            qtype: QuestionType::Rating,
            options: &[],
            required: true,
        },
        SeedQuestion {
            text: "Which area needs the most attention?",
            qtype: QuestionType::MultipleChoice,
            options: &["Planning", "Code review", "Testing", "Communication"],
            required: true,
        },
        SeedQuestion {
            text: "Did you feel blocked at any point?",
            qtype: QuestionType::YesNo,
            options: &[],
            required: false,
        },
        SeedQuestion {
            text: "Anything else you want to share?",
            qtype: QuestionType::Text,
            options: &[],
            required: false,
        },
    ];

    let inputs: Vec<QuestionInput> = questions
        .iter()
        .map(|q| QuestionInput {
            question_text: q.text.to_string(),
            question_type: q.qtype,
            options: q.options.iter().map(|o| o.to_string()).collect(),
            required: q.required,
        })
        .collect();
    db::append_questions(pool, survey.id, &inputs).await?;
    db::set_survey_published(pool, survey.id, true).await?;

    tracing::info!("Seeded demo account {} with survey {}", DEMO_EMAIL, survey.id);
    Ok(())
}
