//! Load data script for the MyPath API
//!
//! Seeds the store directly (no HTTP) with one demo account:
//! - User `demo@mypath.dev` / `demo-password`
//! - Vision "Run a marathon" > goal "Build base mileage" > a few tasks
//! Records that already exist are left alone, so the script can be rerun.
//! Run: cargo run --bin load_data

use chrono::{Duration, Utc};

use mypath_api::auth::hash_password;
use mypath_api::config::bcrypt_cost_from;
use mypath_api::models::{NewUser, Schedule};
use mypath_api::scope::ListFilter;
use mypath_api::storage::Storage;

const DEMO_EMAIL: &str = "demo@mypath.dev";
const DEMO_PASSWORD: &str = "demo-password";

fn named(name: &str) -> Schedule {
    Schedule {
        name: name.to_string(),
        ..Default::default()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "mypath_data".to_string());
    let cost = bcrypt_cost_from(|key| std::env::var(key).ok())?;
    let storage = Storage::open(&data_dir)?;
    let now = Utc::now();

    let user = match storage.find_user_by_email(DEMO_EMAIL)? {
        Some(user) => {
            println!("User {} already present (id {})", DEMO_EMAIL, user.id);
            user
        }
        None => {
            let user = storage.create_user(
                NewUser {
                    name: "Demo Runner".to_string(),
                    nickname: "demo".to_string(),
                    email: DEMO_EMAIL.to_string(),
                    password_hash: hash_password(DEMO_PASSWORD, cost)?,
                },
                now,
            )?;
            println!("Created user {} (id {})", DEMO_EMAIL, user.id);
            user
        }
    };

    let vision_name = "Run a marathon";
    let vision = match storage
        .visions
        .list(user.id, &ListFilter::All)?
        .into_iter()
        .find(|v| v.name == vision_name)
    {
        Some(vision) => vision,
        None => storage.insert_vision(
            user.id,
            Schedule {
                due_date: Some(now + Duration::days(180)),
                ..named(vision_name)
            },
            now,
        )?,
    };

    let goal_name = "Build base mileage";
    let goal = match storage
        .goals
        .list(vision.id, &ListFilter::All)?
        .into_iter()
        .find(|g| g.name == goal_name)
    {
        Some(goal) => goal,
        None => storage.insert_goal(
            vision.id,
            "Get comfortable running 30 km a week".to_string(),
            Schedule {
                start_date: Some(now),
                due_date: Some(now + Duration::days(42)),
                ..named(goal_name)
            },
            now,
        )?,
    };

    let mut created = 0;
    for task_name in [
        "Buy running shoes",
        "Run 3 x 5 km this week",
        "Add a weekly long run",
        "Book a physio check",
    ] {
        if storage.tasks.exists_by_name(task_name, goal.id, None)? {
            continue;
        }
        storage.insert_task(goal.id, named(task_name), now)?;
        created += 1;
    }

    storage.flush()?;
    println!(
        "✅ Seeded vision {} > goal {} with {} new tasks into {}",
        vision.id, goal.id, created, data_dir
    );
    println!("🔑 Log in with {} / {}", DEMO_EMAIL, DEMO_PASSWORD);
    Ok(())
}
