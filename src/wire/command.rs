//! A single-byte-discriminant enum identifying a message's wire command.
//!
//! `zebra-network::protocol::external::message` imports this from a
//! sibling `command` module (not itself retrieved); we rebuild it here in
//! the same role: `Message::command()` maps the logical enum back onto the
//! tag used to key the request tracker (spec.md §4.3) and the dispatch
//! table (spec.md §4.2).

use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[allow(missing_docs)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    Reject,
    GetAddr,
    Addr,
    GetBlocks,
    Inv,
    GetHeaders,
    Headers,
    GetData,
    Block,
    Tx,
    NotFound,
    MemPool,
    FilterLoad,
    FilterAdd,
    FilterClear,
    MerkleBlock,
    CmpctBlock,
    GetBlockTxn,
    BlockTxn,
    SendCmpct,
    FeeFilter,
    SendHeaders,
    GetUtxos,
    Utxos,
    HaveWitness,
    EncInit,
    EncAck,
    AuthChallenge,
    AuthReply,
    AuthPropose,
    Alert,
    Unknown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Reject => "reject",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::GetBlocks => "getblocks",
            Command::Inv => "inv",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::GetData => "getdata",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::NotFound => "notfound",
            Command::MemPool => "mempool",
            Command::FilterLoad => "filterload",
            Command::FilterAdd => "filteradd",
            Command::FilterClear => "filterclear",
            Command::MerkleBlock => "merkleblock",
            Command::CmpctBlock => "cmpctblock",
            Command::GetBlockTxn => "getblocktxn",
            Command::BlockTxn => "blocktxn",
            Command::SendCmpct => "sendcmpct",
            Command::FeeFilter => "feefilter",
            Command::SendHeaders => "sendheaders",
            Command::GetUtxos => "getutxos",
            Command::Utxos => "utxos",
            Command::HaveWitness => "havewitness",
            Command::EncInit => "encinit",
            Command::EncAck => "encack",
            Command::AuthChallenge => "authchallenge",
            Command::AuthReply => "authreply",
            Command::AuthPropose => "authpropose",
            Command::Alert => "alert",
            Command::Unknown => "unknown",
        };
        f.write_str(s)
    }
}
