use std::io::{self, Read, Write};
use std::thread;

use parley::{Stack, TcpStream};

fn main() -> io::Result<()> {
    env_logger::init();

    let stack = Stack::new()?;
    let listener = stack.listen("127.0.0.1:7878")?;

    println!("Listening on 127.0.0.1:7878");

    loop {
        let (stream, addr) = listener.accept()?;

        thread::spawn(move || {
            println!("Accepting stream from: {}", addr);

            if let Err(e) = echo_on(stream) {
                eprintln!("stream from {} failed: {}", addr, e);
            }

            println!("Closing stream from: {}", addr);
        });
    }
}

fn echo_on(mut stream: TcpStream) -> io::Result<()> {
    let mut buf = [0; 4096];
    loop {
        match stream.read(&mut buf)? {
            0 => return Ok(()),
            n => stream.write_all(&buf[..n])?,
        }
    }
}
