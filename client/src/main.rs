use anyhow::Result;
use clap::Parser;
use client::JeuxClient;
use jeux::ServerMessage;
use rand::Rng;
use tokio::io::{self, AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "client", about = "Interactive Jeux client")]
struct Args {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Username to log in with; a random guest name when omitted.
    #[arg(short, long)]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let username = args
        .username
        .unwrap_or_else(|| format!("guest-{:04}", rand::thread_rng().gen_range(0..10000)));

    println!("Connecting to {}", args.addr);
    let mut client = JeuxClient::connect(&args.addr).await?;
    println!("Connected, session {}", client.session_id());

    match client.login(&username).await? {
        ServerMessage::LoggedIn { username, rating } => {
            println!("Logged in as {} (rating {})", username, rating)
        }
        ServerMessage::Nack { reason } => {
            println!("Login refused: {}", reason);
            return Ok(());
        }
        other => println!("Unexpected reply: {:?}", other),
    }

    println!("Commands: users, quit");
    let mut stdin = BufReader::new(io::stdin()).lines();
    while let Some(line) = stdin.next_line().await? {
        match line.trim() {
            "quit" => break,
            "users" => {
                for user in client.users().await? {
                    println!("  {:<20} {}", user.username, user.rating);
                }
            }
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }
    Ok(())
}
