use crate::application::orchestrator::CreatePaymentRequest;
use crate::domain::payment::Metadata;
use crate::domain::ports::PaymentDetails;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Create,
    Process,
    Refund,
    Cancel,
}

/// One raw row of a command script.
///
/// Every row names its payment by (merchant, order). `note` is the
/// description for `create`, `;`-separated `key=value` details for `process`
/// and the reason for `refund`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub command: CommandType,
    pub merchant: String,
    pub order: String,
    pub client: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub note: Option<String>,
}

/// A validated script command.
#[derive(Debug, Clone)]
pub enum Command {
    Create(CreatePaymentRequest),
    Process {
        merchant: String,
        order: String,
        details: PaymentDetails,
    },
    Refund {
        merchant: String,
        order: String,
        amount: Decimal,
        reason: String,
    },
    Cancel {
        merchant: String,
        order: String,
    },
}

fn required<T>(value: Option<T>, field: &str, command: CommandType) -> Result<T> {
    value.ok_or_else(|| PaymentError::validation(format!("{command:?} row is missing {field}")))
}

fn parse_details(note: Option<String>) -> PaymentDetails {
    let mut details = PaymentDetails::new();
    for pair in note.iter().flat_map(|n| n.split(';')) {
        if let Some((key, value)) = pair.split_once('=') {
            details.insert(key.trim().to_string(), value.trim().into());
        }
    }
    details
}

impl TryFrom<CommandRecord> for Command {
    type Error = PaymentError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let CommandRecord {
            command,
            merchant,
            order,
            client,
            amount,
            currency,
            method,
            note,
        } = record;
        match command {
            CommandType::Create => Ok(Self::Create(CreatePaymentRequest {
                client_id: required(client, "client", command)?,
                merchant_id: merchant,
                order_id: order,
                amount: required(amount, "amount", command)?,
                currency: required(currency, "currency", command)?.parse()?,
                method: required(method, "method", command)?.parse()?,
                description: note.unwrap_or_default(),
                metadata: Metadata::new(),
            })),
            CommandType::Process => Ok(Self::Process {
                merchant,
                order,
                details: parse_details(note),
            }),
            CommandType::Refund => Ok(Self::Refund {
                merchant,
                order,
                amount: required(amount, "amount", command)?,
                reason: note.unwrap_or_default(),
            }),
            CommandType::Cancel => Ok(Self::Cancel { merchant, order }),
        }
    }
}

/// Reads payment commands from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted, so trailing optional
/// columns may be left off.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and validates commands.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(PaymentError::from).and_then(Command::try_from))
    }
}
