//! Toy driver for an in-process adOPTed exchange, in the spirit of `dt-cli`:
//! no network, no files, just two or three `Session`s passing `WireMessage`s
//! through plain function calls so the library can be exercised without an
//! actual transport layer.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use adopted::buffer::TextBuffer;
use adopted::chunk::Chunk;
use adopted::operation::Operation;
use adopted::session::{Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive a toy adOPTed exchange between in-process sessions")]
struct Cli {
    /// After the first exchange, also walk a third participant through
    /// full synchronization and print what it ends up with.
    #[arg(long)]
    with_sync_join: bool,

    /// After the exchange, have alice undo and bob redo-nothing, printing
    /// the resulting buffer.
    #[arg(long)]
    with_undo: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut alice = Session::new(1, "alice", TextBuffer::new(), SessionConfig::default());
    let mut bob = Session::new(2, "bob", TextBuffer::new(), SessionConfig::default());
    alice.add_user(2, "bob", false).context("alice learning about bob")?;
    bob.add_user(1, "alice", false).context("bob learning about alice")?;

    // Two concurrent inserts at position 0: alice and bob each act on their
    // own empty-buffer view before seeing the other's edit.
    let msg_a = alice
        .do_local(1, Operation::insert(0, Chunk::single(1, "He")))
        .context("alice's local insert")?;
    let msg_b = bob
        .do_local(2, Operation::insert(0, Chunk::single(2, "llo")))
        .context("bob's local insert")?;
    info!("alice -> bob: {msg_a:?}");
    info!("bob -> alice: {msg_b:?}");

    bob.receive(msg_a).context("bob integrating alice's insert")?;
    alice.receive(msg_b).context("alice integrating bob's insert")?;

    println!("alice's buffer: {:?}", alice.buffer().to_text());
    println!("bob's buffer:   {:?}", bob.buffer().to_text());
    println!("alice's current: {}", alice.algorithm().current());
    println!("bob's current:   {}", bob.algorithm().current());
    assert_eq!(alice.buffer().to_text(), bob.buffer().to_text(), "sites diverged");

    if cli.with_undo {
        let undo = alice.undo_local(1).context("alice's undo")?;
        bob.receive(undo).context("bob integrating alice's undo")?;
        println!("after alice's undo, alice's buffer: {:?}", alice.buffer().to_text());
        println!("after alice's undo, bob's buffer:   {:?}", bob.buffer().to_text());
        assert_eq!(alice.buffer().to_text(), bob.buffer().to_text(), "sites diverged after undo");
    }

    if cli.with_sync_join {
        let stream = alice.sync_stream();
        info!("sync stream has {} messages", stream.len());
        let carol = Session::from_sync_stream(3, "carol", TextBuffer::new(), SessionConfig::default(), stream)
            .context("carol synchronizing onto the session")?;
        println!("carol's buffer after sync: {:?}", carol.buffer().to_text());
        println!("carol's current: {}", carol.algorithm().current());
    }

    Ok(())
}
