use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use inteli_proxy::agent::{AgentClient, AgentConfig};
use inteli_proxy::control::auth::{
    generate_keypair, parse_private_key, private_key_pem, public_key_pem, DEFAULT_KEY_BITS,
};
use inteli_proxy::control::protocol::{ControlEvent, DEFAULT_SUBPROTOCOL};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Key management for the inteli reverse proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Connection {
    /// Control channel URL
    #[arg(short, long, default_value = "ws://localhost:3001")]
    url: String,

    /// Agent id of the sysadmin
    #[arg(long, default_value = "sysadmin")]
    agent_id: String,

    /// PKCS#8 PEM private key of the sysadmin
    #[arg(long)]
    private_key: PathBuf,

    #[arg(long, default_value = DEFAULT_SUBPROTOCOL)]
    subprotocol: String,

    #[arg(long)]
    origin: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate <agent>_privateKey.pem and <agent>_publicKey.pem
    Keygen {
        agent_id: String,
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,
    },
    /// Install an agent public key in the proxy certificate store
    AddKey {
        host_id: String,
        public_key: PathBuf,
        #[command(flatten)]
        connection: Connection,
    },
    /// Remove an agent public key from the proxy certificate store
    RemoveKey {
        host_id: String,
        #[command(flatten)]
        connection: Connection,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { agent_id, out_dir, bits } => {
            let key = generate_keypair(bits)?;
            std::fs::create_dir_all(&out_dir)?;
            let private_path = out_dir.join(format!("{}_privateKey.pem", agent_id));
            let public_path = out_dir.join(format!("{}_publicKey.pem", agent_id));
            std::fs::write(&private_path, private_key_pem(&key)?)?;
            std::fs::write(&public_path, public_key_pem(&key)?)?;
            println!("Wrote {}", private_path.display());
            println!("Wrote {}", public_path.display());
        }
        Commands::AddKey { host_id, public_key, connection } => {
            let pem = std::fs::read_to_string(&public_key)?;
            let mut client = connect(&connection).await?;
            let event = ControlEvent::sysadmin_add(client.credentials().clone(), &host_id, &pem)?;
            client.send_event(&event).await?;
            client.close().await?;
            println!("Sent public key for {}", host_id);
        }
        Commands::RemoveKey { host_id, connection } => {
            let mut client = connect(&connection).await?;
            let event = ControlEvent::sysadmin_remove(client.credentials().clone(), &host_id)?;
            client.send_event(&event).await?;
            client.close().await?;
            println!("Requested removal of {}", host_id);
        }
    }

    Ok(())
}

async fn connect(connection: &Connection) -> Result<AgentClient, Box<dyn std::error::Error>> {
    let key = read_private_key(&connection.private_key)?;
    let mut config = AgentConfig::new(&connection.url, &connection.agent_id, key)
        .with_subprotocol(&connection.subprotocol);
    if let Some(origin) = &connection.origin {
        config = config.with_origin(origin);
    }
    Ok(AgentClient::connect(&config).await?)
}

fn read_private_key(path: &Path) -> Result<rsa::RsaPrivateKey, Box<dyn std::error::Error>> {
    let pem = std::fs::read_to_string(path)?;
    Ok(parse_private_key(&pem)?)
}
