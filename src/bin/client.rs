//! Duel Lobby Client
//!
//! Interactive command-line client. Reads commands from stdin and prints
//! every frame the server sends, including unsolicited notifications.
//!
//! Usage: `duel-lobby-client [ADDR]` (default `127.0.0.1:55555`)

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use duel_lobby::{
    lobby::MatchId,
    network::{
        client::{login_request, read_frame, write_request},
        ClientError, Request,
    },
    DEFAULT_PORT,
};

const HELP: &str = "\
commands:
  login <user> <pass>   authenticate
  list                  list open matches
  create                host a match
  join <id>             join a match
  quit                  withdraw your hosted match
  gameover              report your match over
  help                  show this text
  exit                  disconnect";

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(Request),
    Help,
    Exit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb {
        "login" => {
            let (Some(user), Some(pass)) = (words.next(), words.next()) else {
                bail!("usage: login <user> <pass>");
            };
            Command::Send(login_request(user, pass)?)
        }
        "list" => Command::Send(Request::ListMatches),
        "create" => Command::Send(Request::CreateMatch),
        "join" => {
            let id: u32 = words
                .next()
                .context("usage: join <id>")?
                .parse()
                .context("match id must be a number")?;
            Command::Send(Request::JoinMatch(MatchId::new(id)))
        }
        "quit" => Command::Send(Request::Quit),
        "gameover" => Command::Send(Request::GameOver),
        "help" => Command::Help,
        "exit" => Command::Exit,
        other => bail!("unknown command {:?}, try 'help'", other),
    };
    Ok(Some(command))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    println!("Connected to {}", addr);
    println!("{}", HELP);

    let (mut reader, mut writer) = stream.into_split();

    let printer = tokio::spawn(async move {
        loop {
            match read_frame(&mut reader).await {
                Ok(frame) => println!("{}", frame),
                Err(ClientError::Closed) => {
                    println!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    eprintln!("Receive failed: {}", e);
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if printer.is_finished() {
            break;
        }
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Send(request))) => {
                debug!("Sending {:?}", request.packet_type());
                write_request(&mut writer, &request)
                    .await
                    .context("failed to send request")?;
            }
            Ok(Some(Command::Help)) => println!("{}", HELP),
            Ok(Some(Command::Exit)) => break,
            Err(e) => eprintln!("{:#}", e),
        }
    }

    printer.abort();
    Ok(())
}
