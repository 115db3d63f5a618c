// Interactive menu over any line-oriented reader and writer

use crate::node::Node;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

const MENU: &str = "\n1. Connect to a peer\n2. Create a transaction\n3. View all transactions\n4. View my wallet address\n5. Exit\n";

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Console IO failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry of the operator menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Connect,
    CreateTransaction,
    ListTransactions,
    ShowWallet,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Connect),
            "2" => Some(Self::CreateTransaction),
            "3" => Some(Self::ListTransactions),
            "4" => Some(Self::ShowWallet),
            "5" => Some(Self::Exit),
            _ => None,
        }
    }
}

pub struct Console<R, W> {
    node: Arc<Node>,
    lines: Lines<R>,
    out: W,
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(node: Arc<Node>, input: R, out: W) -> Self {
        Self {
            node,
            lines: input.lines(),
            out,
        }
    }

    /// Run the menu until the operator exits or input ends
    pub async fn run(&mut self) -> Result<(), ConsoleError> {
        loop {
            self.write(MENU).await?;
            let Some(line) = self.prompt("Enter your choice: ").await? else {
                break;
            };

            match MenuChoice::parse(&line) {
                Some(MenuChoice::Connect) => self.connect().await?,
                Some(MenuChoice::CreateTransaction) => self.create_transaction().await?,
                Some(MenuChoice::ListTransactions) => self.list_transactions().await?,
                Some(MenuChoice::ShowWallet) => {
                    let line = format!("Your wallet address is: {}\n", self.node.wallet_address());
                    self.write(&line).await?;
                }
                Some(MenuChoice::Exit) => break,
                None => self.write("Invalid choice. Please try again.\n").await?,
            }
        }

        self.write("Exiting...\n").await
    }

    async fn connect(&mut self) -> Result<(), ConsoleError> {
        let Some(host) = self.prompt("Enter peer host to connect: ").await? else {
            return Ok(());
        };
        let Some(port) = self.prompt("Enter peer port to connect: ").await? else {
            return Ok(());
        };

        let Ok(port) = port.trim().parse::<u16>() else {
            return self.write(&format!("Invalid port: {}\n", port.trim())).await;
        };

        let message = match self.node.connect_to_peer(host.trim(), port).await {
            Ok(_) => format!("Connected to peer {}:{}\n", host.trim(), port),
            Err(e) => format!("Error connecting to peer: {}\n", e),
        };
        self.write(&message).await
    }

    async fn create_transaction(&mut self) -> Result<(), ConsoleError> {
        let Some(recipient) = self.prompt("Enter recipient wallet address: ").await? else {
            return Ok(());
        };
        let Some(amount) = self.prompt("Enter amount: ").await? else {
            return Ok(());
        };

        let amount = match amount.trim().parse::<f64>() {
            Ok(a) if a.is_finite() => a,
            _ => return self.write(&format!("Invalid amount: {}\n", amount.trim())).await,
        };

        let message = match self.node.create_transaction(recipient.trim(), amount).await {
            Ok(record) => format!("Transaction created: {}\n", record),
            Err(e) => format!("Error creating transaction: {}\n", e),
        };
        self.write(&message).await
    }

    async fn list_transactions(&mut self) -> Result<(), ConsoleError> {
        let mut listing = String::from("All transactions:\n");
        for record in self.node.transactions() {
            listing.push_str(&format!("{}\n", record));
        }
        self.write(&listing).await
    }

    async fn prompt(&mut self, text: &str) -> Result<Option<String>, ConsoleError> {
        self.write(text).await?;
        Ok(self.lines.next_line().await?)
    }

    async fn write(&mut self, text: &str) -> Result<(), ConsoleError> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }
}
