//! Drives a live daemon over its control channel: greeting, listing,
//! stopping, duplicate starts, and finally `die`.

use djcl::{net, Logger, Schedule};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(port: u16) -> Client {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Client {
            reader,
            writer: stream,
        }
    }

    fn send(&mut self, cmd: &str) {
        self.writer
            .write_all(format!("{}\r\n", cmd).as_bytes())
            .unwrap();
    }

    /// One CRLF-terminated reply line, terminator stripped. Empty string
    /// on end-of-stream.
    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        line
    }

    /// The pid column of `list` output for `name`, or `-`.
    fn list_entry(&mut self, name: &str) -> String {
        self.send("list");
        let mut pid = None;
        loop {
            let line = self.line();
            if line == "ok" {
                break;
            }
            let mut words = line.split_whitespace();
            let (first, second) = (words.next(), words.next());
            if second == Some(name) {
                pid = first.map(str::to_owned);
            }
        }
        pid.expect("name missing from listing")
    }
}

#[test]
fn scenarios() {
    let schedule = Schedule::parse("a.exec = /bin/sleep 100\n").unwrap();
    let lfd = net::listening_socket(Some("127.0.0.1"), "0").unwrap();
    let port = net::local_port(lfd.as_raw()).unwrap();

    let daemon = std::thread::spawn(move || {
        let mut log = Logger::with_writer(Box::new(std::io::sink()));
        djcl::daemon::run(lfd, schedule, &mut log)
    });

    let mut client = Client::connect(port);
    assert_eq!(
        client.line(),
        "ok Hello. This is djcl; please type commands."
    );

    // happy list: a is running, with a numeric pid
    let pid = client.list_entry("a");
    assert!(pid.parse::<u32>().is_ok(), "pid column was {:?}", pid);

    // duplicate start is refused
    client.send("start a");
    assert_eq!(client.line(), "error: a already running");

    // unknown commands get the usage text
    client.send("frobnicate");
    assert_eq!(client.line(), "error usage:");
    let usage: Vec<String> = (0..6).map(|_| client.line()).collect();
    let usage: Vec<&str> = usage.iter().map(|l| l.trim()).collect();
    assert_eq!(
        usage,
        ["start [name]", "stop  [name]", "list", "help", "die", "exit"]
    );

    // a blank line is still acknowledged
    client.send("");
    assert_eq!(client.line(), "ok");

    // stop: within a second the listing shows `-`
    client.send("stop a");
    assert_eq!(client.line(), "ok");
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        if client.list_entry("a") == "-" {
            break;
        }
        assert!(Instant::now() < deadline, "a never left the listing");
        std::thread::sleep(Duration::from_millis(20));
    }

    // exit closes this connection, from the server's side
    client.send("exit");
    assert_eq!(client.line(), "ok closing connection");
    assert_eq!(client.line(), "");

    // die stops the daemon; the loop returns cleanly
    let mut client = Client::connect(port);
    assert_eq!(
        client.line(),
        "ok Hello. This is djcl; please type commands."
    );
    client.send("die");
    assert_eq!(client.line(), "ok djcl exiting");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !daemon.is_finished() {
        assert!(Instant::now() < deadline, "daemon never exited");
        std::thread::sleep(Duration::from_millis(20));
    }
    daemon.join().unwrap().unwrap();

    // the listener is gone
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
}
