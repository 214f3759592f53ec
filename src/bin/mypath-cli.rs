use clap::{Args, Parser, Subcommand};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fs;

const TOKEN_FILE: &str = ".mypath_token";

#[derive(Parser)]
#[command(name = "mypath-cli")]
#[command(about = "CLI for the MyPath API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Shared key for register/login; falls back to $API_KEY
    #[arg(short = 'k', long)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Register {
        #[arg(short, long)]
        name: String,
        #[arg(short = 'N', long)]
        nickname: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    #[command(subcommand)]
    Vision(ResourceCommand),
    #[command(subcommand)]
    Goal(ResourceCommand),
    #[command(subcommand)]
    Task(ResourceCommand),
    /// Ask the AI provider for a task breakdown of a goal
    Generate {
        #[arg(short, long)]
        prompt: String,
    },
}

/// Same verbs for every resource; `--parent` is the user, vision or goal id.
#[derive(Subcommand)]
enum ResourceCommand {
    Create {
        #[arg(short = 'P', long)]
        parent: u64,
        /// Repeat for tasks to create several in one call
        #[arg(short, long, required = true)]
        name: Vec<String>,
        /// Goals only
        #[arg(long)]
        prompt: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    Show {
        #[arg(short = 'P', long)]
        parent: u64,
        #[arg(short, long)]
        finished: Option<bool>,
        #[arg(short, long)]
        search: Option<String>,
    },
    Update {
        #[arg(short, long)]
        id: u64,
        #[arg(short = 'P', long)]
        parent: u64,
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        prompt: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    Delete {
        #[arg(short, long)]
        id: u64,
        #[arg(short = 'P', long)]
        parent: u64,
    },
}

#[derive(Args)]
struct ScheduleArgs {
    /// RFC 3339 or YYYY-MM-DD
    #[arg(long)]
    start_date: Option<String>,
    #[arg(long)]
    due_date: Option<String>,
    #[arg(long)]
    finished: bool,
}

impl ScheduleArgs {
    fn apply(&self, body: &mut Map<String, Value>) {
        if let Some(start) = &self.start_date {
            body.insert("start_date".into(), json!(start));
        }
        if let Some(due) = &self.due_date {
            body.insert("due_date".into(), json!(due));
        }
        body.insert("finished".into(), json!(self.finished));
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Vision,
    Goal,
    Task,
}

impl Kind {
    fn base(self) -> &'static str {
        match self {
            Kind::Vision => "vision/v1",
            Kind::Goal => "goal/v1",
            Kind::Task => "task/v1",
        }
    }

    fn parent_key(self) -> &'static str {
        match self {
            Kind::Vision => "user_id",
            Kind::Goal => "vision_id",
            Kind::Task => "goal_id",
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

fn authorized(request: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    request.header("Authorization", format!("Bearer {}", token.trim()))
}

async fn print(res: Response) -> Result<(), reqwest::Error> {
    let status = res.status();
    println!("[{}] {}", status.as_u16(), res.text().await?);
    Ok(())
}

async fn resource(
    client: &Client,
    url: &str,
    kind: Kind,
    command: ResourceCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = format!("{}/{}", url, kind.base());
    let parent_key = kind.parent_key();

    let request = match command {
        ResourceCommand::Create {
            parent,
            name,
            prompt,
            schedule,
        } => {
            let body = match kind {
                Kind::Task => {
                    let tasks: Vec<Value> = name
                        .iter()
                        .map(|n| {
                            let mut task = Map::new();
                            task.insert("name".into(), json!(n));
                            schedule.apply(&mut task);
                            Value::Object(task)
                        })
                        .collect();
                    json!({ "goal_id": parent, "tasks": tasks })
                }
                Kind::Vision | Kind::Goal => {
                    let [single] = name.as_slice() else {
                        return Err("visions and goals take exactly one --name".into());
                    };
                    let mut body = Map::new();
                    body.insert(parent_key.into(), json!(parent));
                    body.insert("name".into(), json!(single));
                    if let Some(prompt) = prompt {
                        body.insert("prompt".into(), json!(prompt));
                    }
                    schedule.apply(&mut body);
                    Value::Object(body)
                }
            };
            client.post(format!("{}/create", base)).json(&body)
        }
        ResourceCommand::Show {
            parent,
            finished,
            search,
        } => {
            let mut query = vec![(parent_key.to_string(), parent.to_string())];
            if let Some(finished) = finished {
                query.push(("finished".into(), finished.to_string()));
            }
            if let Some(search) = search {
                query.push(("search".into(), search));
            }
            client.get(format!("{}/show", base)).query(&query)
        }
        ResourceCommand::Update {
            id,
            parent,
            name,
            prompt,
            schedule,
        } => {
            let mut body = Map::new();
            body.insert("id".into(), json!(id));
            body.insert(parent_key.into(), json!(parent));
            body.insert("name".into(), json!(name));
            if let Some(prompt) = prompt {
                body.insert("prompt".into(), json!(prompt));
            }
            schedule.apply(&mut body);
            client.put(format!("{}/update", base)).json(&body)
        }
        ResourceCommand::Delete { id, parent } => client
            .delete(format!("{}/delete", base))
            .query(&[("id", id.to_string()), (parent_key, parent.to_string())]),
    };

    print(authorized(request).send().await?).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let api_key = cli
        .api_key
        .or_else(|| std::env::var("API_KEY").ok())
        .unwrap_or_default();

    match cli.command {
        Commands::Register {
            name,
            nickname,
            email,
            password,
        } => {
            let res = client
                .post(format!("{}/auth/v1/register", cli.url))
                .header("apikey", &api_key)
                .json(&json!({
                    "name": name,
                    "nickname": nickname,
                    "email": email,
                    "password": password,
                    "password_confirm": password
                }))
                .send()
                .await?;
            print(res).await?;
        }
        Commands::Login { email, password } => {
            let res = client
                .post(format!("{}/auth/v1/login", cli.url))
                .header("apikey", &api_key)
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            if res.status().is_success() {
                let body: LoginResponse = res.json().await?;
                fs::write(TOKEN_FILE, body.token)?;
                println!("Logged in. Token saved to {}", TOKEN_FILE);
            } else {
                println!("Login failed: {}", res.text().await?);
            }
        }
        Commands::Logout => {
            let res = client
                .post(format!("{}/auth/v1/logout", cli.url))
                .send()
                .await?;
            let _ = fs::remove_file(TOKEN_FILE);
            print(res).await?;
        }
        Commands::Vision(command) => resource(&client, &cli.url, Kind::Vision, command).await?,
        Commands::Goal(command) => resource(&client, &cli.url, Kind::Goal, command).await?,
        Commands::Task(command) => resource(&client, &cli.url, Kind::Task, command).await?,
        Commands::Generate { prompt } => {
            let res = authorized(client.post(format!("{}/ai/v1/generate", cli.url)))
                .json(&json!({ "prompt": prompt }))
                .send()
                .await?;
            print(res).await?;
        }
    }

    Ok(())
}
