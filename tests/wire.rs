use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Config, NoTls, Notification, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use innkeep::auth::StaffRoster;
use innkeep::clock::ManualClock;
use innkeep::engine::{Engine, EngineSettings};
use innkeep::notify::NotifyHub;
use innkeep::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("innkeep_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let clock = ManualClock::at_date("2025-03-01".parse().unwrap());
    let engine = Arc::new(
        Engine::open(
            dir.join("innkeep.wal"),
            Arc::new(NotifyHub::new()),
            Arc::new(clock),
            EngineSettings::default(),
        )
        .unwrap(),
    );
    let roster = Arc::new(StaffRoster::new(["manager".to_string()]));

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            let roster = roster.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, roster, "innkeep".to_string(), None).await;
            });
        }
    });

    (addr, engine)
}

async fn connect_as(
    addr: SocketAddr,
    user: &str,
) -> (
    tokio_postgres::Client,
    mpsc::UnboundedReceiver<Notification>,
) {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("innkeep")
        .user(user)
        .password("innkeep");

    let (client, mut connection) = config.connect(NoTls).await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let stream = stream::poll_fn(move |cx| connection.poll_message(cx));
        futures::pin_mut!(stream);
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(AsyncMessage::Notification(n)) => {
                    let _ = tx.send(n);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    (client, rx)
}

async fn connect(addr: SocketAddr) -> (tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>) {
    connect_as(addr, "manager").await
}

async fn recv_notification(
    rx: &mut mpsc::UnboundedReceiver<Notification>,
    timeout: Duration,
) -> Option<Notification> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn sqlstate(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client.batch_execute(sql).await.unwrap_err();
    err.as_db_error()
        .map(|e| e.code().code().to_string())
        .unwrap_or_else(|| panic!("expected a database error, got {err}"))
}

async fn create_room(client: &tokio_postgres::Client, price_minor: i64) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO units (id, kind, name, base_price, max_guests, number) VALUES ('{id}', 'room', 'Deluxe', {price_minor}, 2, '101')"
        ))
        .await
        .unwrap();
    id
}

async fn book(client: &tokio_postgres::Client, unit_id: Ulid, check_in: &str, check_out: &str) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (id, unit_id, check_in, check_out, guest_name, guest_email) \
             VALUES ('{id}', '{unit_id}', '{check_in}', '{check_out}', 'Noor', 'noor@example.com')"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn book_and_check_in_over_the_wire() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;

    let unit_id = create_room(&client, 50_000).await;
    let rid = book(&client, unit_id, "2025-03-01", "2025-03-04").await;
    client
        .batch_execute(&format!("INSERT INTO check_ins VALUES ('{rid}')"))
        .await
        .unwrap();

    let units = rows(&client, &format!("SELECT * FROM units WHERE id = '{unit_id}'")).await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].get("occupancy"), Some("checked_in"));
    assert_eq!(units[0].get("live_price"), Some("50000"));

    let reservations = rows(&client, &format!("SELECT * FROM reservations WHERE unit_id = '{unit_id}'")).await;
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].get("id"), Some(rid.to_string().as_str()));
    assert_eq!(reservations[0].get("status"), Some("checked_in"));
    assert_eq!(reservations[0].get("nights"), Some("3"));
}

#[tokio::test]
async fn overlapping_booking_reports_exclusion_violation() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;

    let unit_id = create_room(&client, 50_000).await;
    book(&client, unit_id, "2025-03-01", "2025-03-05").await;

    let other = Ulid::new();
    let code = sqlstate(
        &client,
        &format!(
            "INSERT INTO reservations (id, unit_id, check_in, check_out, guest_name, guest_phone) \
             VALUES ('{other}', '{unit_id}', '2025-03-04', '2025-03-06', 'Ravi', '+4712345678')"
        ),
    )
    .await;
    assert_eq!(code, "23P01");

    // Back-to-back stays are fine.
    book(&client, unit_id, "2025-03-05", "2025-03-08").await;
}

#[tokio::test]
async fn errors_carry_sqlstates() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;
    let unit_id = create_room(&client, 50_000).await;
    let rid = book(&client, unit_id, "2025-03-01", "2025-03-04").await;

    // Checking out a guest who never arrived.
    assert_eq!(sqlstate(&client, &format!("INSERT INTO check_outs VALUES ('{rid}')")).await, "55000");
    // Unknown reservation.
    assert_eq!(
        sqlstate(&client, &format!("INSERT INTO check_ins VALUES ('{}')", Ulid::new())).await,
        "P0002"
    );
    // Unknown table.
    assert_eq!(sqlstate(&client, "SELECT * FROM guests").await, "42601");
    // Inverted range.
    assert_eq!(
        sqlstate(
            &client,
            &format!(
                "INSERT INTO reservations (id, unit_id, check_in, check_out, guest_name, guest_email) \
                 VALUES ('{}', '{unit_id}', '2025-04-04', '2025-04-01', 'Noor', 'noor@example.com')",
                Ulid::new()
            ),
        )
        .await,
        "22023"
    );
}

#[tokio::test]
async fn staff_cannot_force_clean() {
    let (addr, _engine) = start_test_server().await;
    let (manager, _) = connect(addr).await;
    let (staff, _) = connect_as(addr, "jun").await;

    let unit_id = create_room(&manager, 50_000).await;
    let rid = book(&manager, unit_id, "2025-03-01", "2025-03-02").await;
    manager
        .batch_execute(&format!("INSERT INTO check_ins VALUES ('{rid}')"))
        .await
        .unwrap();
    manager
        .batch_execute(&format!("INSERT INTO check_outs VALUES ('{rid}')"))
        .await
        .unwrap();

    assert_eq!(sqlstate(&staff, &format!("INSERT INTO force_cleans VALUES ('{unit_id}')")).await, "42501");
    staff
        .batch_execute(&format!("INSERT INTO housekeeping VALUES ('{unit_id}', 'cleaning')"))
        .await
        .unwrap();
    manager
        .batch_execute(&format!("INSERT INTO force_cleans VALUES ('{unit_id}')"))
        .await
        .unwrap();

    let log = rows(&staff, &format!("SELECT * FROM housekeeping_log WHERE unit_id = '{unit_id}'")).await;
    let causes: Vec<_> = log.iter().map(|r| r.get("cause").unwrap_or_default().to_string()).collect();
    assert_eq!(causes, vec!["checkout", "advance", "forced_clean"]);
    assert_eq!(log[2].get("by"), Some("manager"));
}

#[tokio::test]
async fn availability_search_and_invoice() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;
    let unit_id = create_room(&client, 50_000).await;

    let free = rows(
        &client,
        "SELECT * FROM availability WHERE check_in = '2025-03-01' AND check_out = '2025-03-04'",
    )
    .await;
    assert!(free.iter().any(|r| r.get("unit_id") == Some(unit_id.to_string().as_str())));

    let rid = book(&client, unit_id, "2025-03-01", "2025-03-04").await;
    let free = rows(
        &client,
        "SELECT * FROM availability WHERE check_in = '2025-03-02' AND check_out = '2025-03-03'",
    )
    .await;
    assert!(free.is_empty());

    let invoice_id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO check_ins VALUES ('{rid}')"))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO invoices (id, reservation_id) VALUES ('{invoice_id}', '{rid}')"
        ))
        .await
        .unwrap();
    let invoice = rows(&client, &format!("SELECT * FROM invoices WHERE id = '{invoice_id}'")).await;
    assert_eq!(invoice[0].get("subtotal"), Some("150000"));
    assert_eq!(invoice[0].get("tax"), Some("22500"));
    assert_eq!(invoice[0].get("total"), Some("172500"));

    client
        .batch_execute(&format!("INSERT INTO payments VALUES ('{invoice_id}', 172500)"))
        .await
        .unwrap();
    let invoice = rows(&client, &format!("SELECT * FROM invoices WHERE id = '{invoice_id}'")).await;
    assert_eq!(invoice[0].get("status"), Some("paid"));
    assert_eq!(invoice[0].get("balance"), Some("0"));
}

#[tokio::test]
async fn listen_delivers_on_next_query() {
    let (addr, _engine) = start_test_server().await;
    let (listener, mut rx) = connect(addr).await;
    let unit_id = create_room(&listener, 50_000).await;
    listener
        .batch_execute(&format!("LISTEN unit_{unit_id}"))
        .await
        .unwrap();

    let (writer, _) = connect(addr).await;
    book(&writer, unit_id, "2025-03-01", "2025-03-04").await;

    // Queued until the listening connection talks to the server again.
    listener.batch_execute("SELECT * FROM rate_modifiers").await.unwrap();
    let notif = recv_notification(&mut rx, Duration::from_secs(5))
        .await
        .expect("expected notification");
    assert_eq!(notif.channel(), format!("unit_{unit_id}"));
    let payload: serde_json::Value = serde_json::from_str(notif.payload()).unwrap();
    assert!(payload.get("ReservationCreated").is_some(), "{payload}");
}

#[tokio::test]
async fn notifications_only_for_subscribed_unit() {
    let (addr, _engine) = start_test_server().await;
    let (listener, mut rx) = connect(addr).await;
    let watched = create_room(&listener, 50_000).await;
    let other = create_room(&listener, 60_000).await;
    listener.batch_execute(&format!("LISTEN unit_{watched}")).await.unwrap();

    let (writer, _) = connect(addr).await;
    book(&writer, other, "2025-03-01", "2025-03-04").await;
    listener.batch_execute("SELECT * FROM rate_modifiers").await.unwrap();
    assert!(recv_notification(&mut rx, Duration::from_millis(300)).await.is_none());

    listener.batch_execute(&format!("UNLISTEN unit_{watched}")).await.unwrap();
    book(&writer, watched, "2025-03-01", "2025-03-04").await;
    listener.batch_execute("SELECT * FROM rate_modifiers").await.unwrap();
    assert!(recv_notification(&mut rx, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn invalid_channel_rejected() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;
    assert_eq!(sqlstate(&client, "LISTEN bookings").await, "42000");
    // Channels are only opened for units that exist.
    assert_eq!(sqlstate(&client, &format!("LISTEN unit_{}", Ulid::new())).await, "P0002");
}

#[tokio::test]
async fn bound_parameters_are_inserted_verbatim() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;
    let unit_id = create_room(&client, 50_000).await;

    let id = Ulid::new().to_string();
    let unit = unit_id.to_string();
    client
        .execute(
            "INSERT INTO reservations (id, unit_id, check_in, check_out, guest_name, guest_email) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&id, &unit, &"2025-03-01", &"2025-03-04", &"O'Neil", &"pay$1@example.com"],
        )
        .await
        .unwrap();

    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("guest_name"), Some("O'Neil"));
    assert_eq!(found[0].get("guest_email"), Some("pay$1@example.com"));
}

#[tokio::test]
async fn named_columns_land_in_their_own_fields() {
    let (addr, _engine) = start_test_server().await;
    let (client, _rx) = connect(addr).await;
    let unit_id = create_room(&client, 50_000).await;

    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO reservations (guest_phone, guest_name, check_out, check_in, unit_id, id) \
             VALUES ('+44 20 7946 0000', 'Noor', '2025-03-04', '2025-03-01', '{unit_id}', '{id}')"
        ))
        .await
        .unwrap();

    let found = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(found[0].get("guest_phone"), Some("+44 20 7946 0000"));
    assert_eq!(found[0].get("guest_email"), None);
    assert_eq!(found[0].get("check_in"), Some("2025-03-01"));
}
