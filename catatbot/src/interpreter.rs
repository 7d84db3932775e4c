use std::path::PathBuf;

use chrono::Utc;

use crate::category::Classifier;
use crate::export;
use crate::price::parse_price;
use crate::report;
use crate::session::{PendingSelection, SessionStore};
use crate::store::ExpenseStore;
use crate::transport::InboundMessage;

const GENERIC_FAILURE: &str = "❌ Ups! Terjadi kesalahan. Coba lagi nanti.";
const EXPORT_FAILURE: &str = "❌ Ups! Gagal membuat laporan. Coba lagi nanti.";
const INVALID_SELECTION: &str = "❌ Pilihan tidak valid. Penghapusan dibatalkan.";
const NOTHING_TO_DELETE: &str = "Tidak ada pengeluaran hari ini yang bisa dihapus.";

const HELP_INPUT: &str = "🤖 Daftar Perintah Pemasukan Data:
• Category Makan Minum : makan harga | minum harga (ex: makan_nasgor 12rb, minum_jus 20rb)
• Category Sahabat Sebat : rokok harga (ex: rokok_liquid 35rb)
• Category Transport : maxim harga | gojek harga | grab harga | bensin harga (ex: gojek_kekantor 20rb, bensin 10rb)
• Category Entertaiment : internet harga (ex: internet_kuota 25rb, internet_viu 50rb)
• Category Komunikasi : kuota harga | pulsa harga (ex: pulsa 20rb, kuota 10rb)
• Category Listrik : token harga (ex: token_pln 20rb, token 10rb)
• Category Lain-lain : apapun harga (ex: sumbangan 20rb, sedekah 10rb)

Kirim salah satu perintah di atas untuk mencatat pengeluaran.";

const HELP_QUERIES: &str = "🤖 Daftar Perintah Pengeluaran:
• download pengeluaran
• pengeluaran hari ini
• pengeluaran minggu ini
• pengeluaran bulan ini
• detail pengeluaran hari ini
• detail pengeluaran minggu ini
• ringkasan
• hapus pengeluaran

Kirim salah satu perintah di atas untuk melihat atau mengubah pengeluaran.";

/// Recognized command forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddExpense { name: String, amount: i64 },
    HelpInput,
    HelpQueries,
    ExpensesToday,
    ExpensesThisWeek,
    ExpensesThisMonth,
    DetailToday,
    DetailThisWeek,
    Download,
    Summary,
    Delete,
}

/// Map normalized (lower-cased, trimmed) text onto a command. `None` means
/// the message is ordinary conversation and the bot stays silent.
///
/// The two-token expense form is checked first, so "ringkasan 5k" records
/// an expense named "ringkasan" rather than running the summary.
pub fn parse_command(text: &str) -> Option<Command> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() == 2 {
        if let Some(amount) = parse_price(parts[1]) {
            if amount > 0 {
                return Some(Command::AddExpense {
                    name: parts[0].to_string(),
                    amount,
                });
            }
        }
    }

    match text {
        "bantuan bot" => Some(Command::HelpInput),
        "bantuan pengeluaran" => Some(Command::HelpQueries),
        "pengeluaran hari ini" => Some(Command::ExpensesToday),
        "pengeluaran minggu ini" => Some(Command::ExpensesThisWeek),
        "pengeluaran bulan ini" => Some(Command::ExpensesThisMonth),
        "detail pengeluaran hari ini" => Some(Command::DetailToday),
        "detail pengeluaran minggu ini" => Some(Command::DetailThisWeek),
        "download pengeluaran" => Some(Command::Download),
        "hapus pengeluaran" | "undo" => Some(Command::Delete),
        _ if text.starts_with("ringkasan") => Some(Command::Summary),
        _ => None,
    }
}

/// The command interpreter: stateless over the store except for the
/// per-conversation pending-deletion snapshots.
pub struct Interpreter {
    store: ExpenseStore,
    classifier: Classifier,
    sessions: SessionStore,
    download_dir: PathBuf,
    base_url: String,
}

impl Interpreter {
    pub fn new(
        store: ExpenseStore,
        classifier: Classifier,
        download_dir: PathBuf,
        base_url: String,
    ) -> Self {
        Self {
            store,
            classifier,
            sessions: SessionStore::new(),
            download_dir,
            base_url,
        }
    }

    /// Handle one inbound message and return at most one reply.
    ///
    /// Taking the pending selection up front implements the session rules:
    /// any recognized command supersedes a stale selection, and only text
    /// that matches nothing else is interpreted as a selection answer.
    pub async fn handle_message(&self, msg: &InboundMessage) -> Option<String> {
        let sender_name = msg.sender_name.as_deref().unwrap_or("Tanpa Nama");
        if let Err(e) = self.store.upsert_sender(sender_name, &msg.sender).await {
            log::error!("failed to record sender {}: {}", msg.sender, e);
        }

        let normalized = msg.text.trim().to_lowercase();
        let pending = self.sessions.take_pending(&msg.conversation).await;

        if let Some(cmd) = parse_command(&normalized) {
            return Some(self.execute(cmd, msg).await);
        }

        if let Some(pending) = pending {
            return Some(self.handle_selection(&normalized, pending).await);
        }

        None
    }

    async fn execute(&self, cmd: Command, msg: &InboundMessage) -> String {
        match cmd {
            Command::AddExpense { name, amount } => self.add_expense(msg, &name, amount).await,
            Command::HelpInput => HELP_INPUT.to_string(),
            Command::HelpQueries => HELP_QUERIES.to_string(),
            Command::ExpensesToday => {
                let now = Utc::now();
                let (start, end) = report::today_range(now);
                let title = format!("Pengeluaran Hari Ini ({})", report::localized_date(now));
                self.range_summary(start, end, &title).await
            }
            Command::ExpensesThisWeek => {
                let (start, end) = report::week_range(Utc::now());
                self.range_summary(start, end, "Pengeluaran Minggu Ini").await
            }
            Command::ExpensesThisMonth => {
                let (start, end) = report::month_range(Utc::now());
                self.range_summary(start, end, "Pengeluaran Bulan Ini").await
            }
            Command::DetailToday => {
                let now = Utc::now();
                let (start, end) = report::today_range(now);
                let title = format!(
                    "Detail Pengeluaran Hari Ini ({})",
                    report::localized_date(now)
                );
                self.range_detail(start, end, &title).await
            }
            Command::DetailThisWeek => {
                let (start, end) = report::week_range(Utc::now());
                self.range_detail(start, end, "Detail Pengeluaran Minggu Ini")
                    .await
            }
            Command::Download => self.download().await,
            Command::Summary => self.summary().await,
            Command::Delete => self.start_delete(&msg.conversation).await,
        }
    }

    async fn add_expense(&self, msg: &InboundMessage, name: &str, amount: i64) -> String {
        // Group chats get the shared category table; direct chats are all
        // filed under the default category.
        let category = if msg.is_group {
            self.classifier.classify(name).to_string()
        } else {
            self.classifier.default_category().to_string()
        };

        match self.store.insert(name, &category, amount, Utc::now()).await {
            Ok(_) => {
                if msg.is_group {
                    format!(
                        "✅ Pengeluaran dicatat:\n📝 Item: {}\n📊 Kategori: {}\n💰 Harga: {} IDR",
                        name,
                        category,
                        report::format_idr(amount)
                    )
                } else {
                    format!(
                        "✅ Pengeluaran pribadi dicatat:\n📝 Item: {}\n💰 Harga: {} IDR",
                        name,
                        report::format_idr(amount)
                    )
                }
            }
            Err(e) => {
                log::error!("failed to record expense {:?}: {}", name, e);
                GENERIC_FAILURE.to_string()
            }
        }
    }

    async fn range_summary(
        &self,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        title: &str,
    ) -> String {
        match self.store.list_between(start, end).await {
            Ok(records) => report::summarize(&records, title),
            Err(e) => {
                log::error!("failed to list expenses: {}", e);
                GENERIC_FAILURE.to_string()
            }
        }
    }

    async fn range_detail(
        &self,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        title: &str,
    ) -> String {
        match self.store.list_between(start, end).await {
            Ok(records) => report::detail_report(&records, title),
            Err(e) => {
                log::error!("failed to list expenses: {}", e);
                GENERIC_FAILURE.to_string()
            }
        }
    }

    async fn download(&self) -> String {
        let records = match self.store.list_all().await {
            Ok(records) => records,
            Err(e) => {
                log::error!("failed to list expenses for export: {}", e);
                return EXPORT_FAILURE.to_string();
            }
        };
        match export::write_expense_sheet(&records, &self.download_dir) {
            Ok(file_name) => format!(
                "📊 Laporan Pengeluaran\n\n✅ File laporan telah dibuat!\n🔗 Unduh di: {}/download/{}",
                self.base_url, file_name
            ),
            Err(e) => {
                log::error!("failed to build export: {}", e);
                EXPORT_FAILURE.to_string()
            }
        }
    }

    async fn summary(&self) -> String {
        match self.store.aggregate_by_category().await {
            Ok(rows) => report::aggregate_summary(&rows),
            Err(e) => {
                log::error!("failed to aggregate expenses: {}", e);
                GENERIC_FAILURE.to_string()
            }
        }
    }

    async fn start_delete(&self, conversation: &str) -> String {
        let (start, end) = report::today_range(Utc::now());
        let records = match self.store.list_between(start, end).await {
            Ok(records) => records,
            Err(e) => {
                log::error!("failed to list today's expenses: {}", e);
                return GENERIC_FAILURE.to_string();
            }
        };
        if records.is_empty() {
            return NOTHING_TO_DELETE.to_string();
        }

        let mut message = String::from("🗑️ Pilih pengeluaran yang akan dihapus:\n\n");
        for (i, record) in records.iter().enumerate() {
            message.push_str(&format!(
                "{}. {}: {} IDR\n",
                i + 1,
                record.name,
                report::format_idr(record.amount)
            ));
        }
        message
            .push_str("\nBalas dengan nomor untuk menghapus, atau kirim perintah lain untuk membatalkan.");

        self.sessions.set_pending(conversation, records).await;
        message
    }

    async fn handle_selection(&self, text: &str, pending: PendingSelection) -> String {
        log::debug!(
            "deletion pick {:?} answered {}s after the listing",
            text,
            (Utc::now() - pending.created_at).num_seconds()
        );
        let choice = text.parse::<usize>().ok().filter(|n| *n >= 1);
        let Some(index) = choice else {
            return INVALID_SELECTION.to_string();
        };
        let Some(record) = pending.records.get(index - 1) else {
            return INVALID_SELECTION.to_string();
        };

        match self.store.delete_by_id(record.id).await {
            Ok(0) => "❌ Pengeluaran itu sudah terhapus.".to_string(),
            Ok(_) => format!(
                "✅ Pengeluaran \"{}\" ({} IDR) dihapus.",
                record.name,
                report::format_idr(record.amount)
            ),
            Err(e) => {
                log::error!("failed to delete expense {}: {}", record.id, e);
                GENERIC_FAILURE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Classifier;
    use crate::store::ExpenseStore;

    fn test_interpreter(download_dir: PathBuf) -> Interpreter {
        Interpreter::new(
            ExpenseStore::open_in_memory().expect("in-memory store"),
            Classifier::builtin(),
            download_dir,
            "http://localhost:1234".to_string(),
        )
    }

    fn group_message(text: &str) -> InboundMessage {
        InboundMessage {
            conversation: "group-1@g.us".to_string(),
            is_group: true,
            sender: "628123".to_string(),
            sender_name: Some("Budi".to_string()),
            text: text.to_string(),
        }
    }

    fn direct_message(text: &str) -> InboundMessage {
        InboundMessage {
            conversation: "628123@s".to_string(),
            is_group: false,
            sender: "628123".to_string(),
            sender_name: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_command_forms() {
        assert_eq!(
            parse_command("makan_siang 15rb"),
            Some(Command::AddExpense {
                name: "makan_siang".to_string(),
                amount: 15_000,
            })
        );
        assert_eq!(parse_command("bantuan bot"), Some(Command::HelpInput));
        assert_eq!(
            parse_command("pengeluaran hari ini"),
            Some(Command::ExpensesToday)
        );
        assert_eq!(parse_command("undo"), Some(Command::Delete));
        assert_eq!(parse_command("ringkasan bulan lalu"), Some(Command::Summary));
        assert_eq!(parse_command("halo semuanya"), None);
        // Zero-priced and price-less two-token messages are not expenses.
        assert_eq!(parse_command("makan 0"), None);
        assert_eq!(parse_command("halo dunia"), None);
    }

    #[test]
    fn test_expense_form_precedes_keywords() {
        // A price as the second token always wins over keyword commands.
        assert_eq!(
            parse_command("ringkasan 5k"),
            Some(Command::AddExpense {
                name: "ringkasan".to_string(),
                amount: 5000,
            })
        );
    }

    #[tokio::test]
    async fn test_group_expense_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());

        let reply = interpreter
            .handle_message(&group_message("makan_siang 15rb"))
            .await
            .expect("expense confirmation");
        assert!(reply.contains("makan_siang"));
        assert!(reply.contains("Makanan"));
        assert!(reply.contains("15.000"));

        let records = interpreter.store.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, 15_000);
        assert_eq!(records[0].category, "Makanan");
    }

    #[tokio::test]
    async fn test_direct_expense_uses_default_category() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());

        let reply = interpreter
            .handle_message(&direct_message("makan_siang 15rb"))
            .await
            .expect("expense confirmation");
        assert!(reply.contains("pribadi"));

        let records = interpreter.store.list_all().await.unwrap();
        assert_eq!(records[0].category, "Lain-lain");
    }

    #[tokio::test]
    async fn test_ordinary_conversation_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());

        assert!(
            interpreter
                .handle_message(&group_message("halo semuanya apa kabar"))
                .await
                .is_none()
        );
        assert!(
            interpreter
                .handle_message(&group_message("makan gratis"))
                .await
                .is_none()
        );
        assert!(interpreter.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_commands_do_not_mutate_store() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();

        for text in [
            "pengeluaran hari ini",
            "pengeluaran minggu ini",
            "pengeluaran bulan ini",
            "detail pengeluaran hari ini",
            "ringkasan",
            "bantuan bot",
            "bantuan pengeluaran",
        ] {
            let reply = interpreter.handle_message(&group_message(text)).await;
            assert!(reply.is_some(), "{:?} should reply", text);
        }
        assert_eq!(interpreter.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_today_summary_contains_category_totals() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("gojek 20rb"))
            .await
            .unwrap();

        let reply = interpreter
            .handle_message(&group_message("pengeluaran hari ini"))
            .await
            .unwrap();
        assert!(reply.contains("Pengeluaran Hari Ini"));
        assert!(reply.contains("Transport: 20.000 IDR (1 transaksi)"));
        assert!(reply.contains("Makanan: 10.000 IDR (1 transaksi)"));
        assert!(reply.contains("Total Pengeluaran: 30.000 IDR"));
    }

    #[tokio::test]
    async fn test_delete_flow_removes_the_picked_record() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("gojek 30rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("kuota 20rb"))
            .await
            .unwrap();

        let listing = interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();
        // Snapshot order is amount descending.
        assert!(listing.contains("1. gojek: 30.000 IDR"));
        assert!(listing.contains("2. kuota: 20.000 IDR"));
        assert!(listing.contains("3. makan: 10.000 IDR"));

        let reply = interpreter
            .handle_message(&group_message("2"))
            .await
            .unwrap();
        assert!(reply.contains("kuota"));
        assert!(reply.contains("dihapus"));

        let names: Vec<String> = interpreter
            .store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"kuota".to_string()));
    }

    #[tokio::test]
    async fn test_delete_with_no_records_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());

        let reply = interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();
        assert_eq!(reply, NOTHING_TO_DELETE);

        // No pending selection was created: a number is ordinary text.
        assert!(interpreter.handle_message(&group_message("1")).await.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_selection_is_rejected_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();

        let reply = interpreter
            .handle_message(&group_message("9"))
            .await
            .unwrap();
        assert_eq!(reply, INVALID_SELECTION);
        assert_eq!(interpreter.store.list_all().await.unwrap().len(), 1);

        // The failed selection resolved the session back to idle.
        assert!(interpreter.handle_message(&group_message("1")).await.is_none());
    }

    #[tokio::test]
    async fn test_non_numeric_answer_cancels_the_selection() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();

        let reply = interpreter
            .handle_message(&group_message("jangan jadi deh"))
            .await
            .unwrap();
        assert_eq!(reply, INVALID_SELECTION);
        assert_eq!(interpreter.store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_command_while_awaiting_selection_wins_and_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();

        // A new expense is not blocked by the stale pending state...
        let reply = interpreter
            .handle_message(&group_message("gojek 20rb"))
            .await
            .unwrap();
        assert!(reply.contains("gojek"));

        // ...and the selection is gone: "1" is ordinary text again.
        assert!(interpreter.handle_message(&group_message("1")).await.is_none());
        assert_eq!(interpreter.store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_selection_uses_snapshot_not_fresh_query() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();

        let listing = interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();
        assert!(listing.contains("1. makan"));

        // Insert a bigger expense from another conversation while the
        // selection is pending; index 1 must still mean "makan".
        let mut other = group_message("bensin 50rb");
        other.conversation = "group-2@g.us".to_string();
        interpreter.handle_message(&other).await.unwrap();

        let reply = interpreter
            .handle_message(&group_message("1"))
            .await
            .unwrap();
        assert!(reply.contains("makan"));

        let names: Vec<String> = interpreter
            .store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["bensin".to_string()]);
    }

    #[tokio::test]
    async fn test_new_delete_request_supersedes_pending_selection() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("gojek 20rb"))
            .await
            .unwrap();

        // Second delete request snapshots both records.
        let listing = interpreter
            .handle_message(&group_message("hapus pengeluaran"))
            .await
            .unwrap();
        assert!(listing.contains("1. gojek"));
        assert!(listing.contains("2. makan"));

        let reply = interpreter
            .handle_message(&group_message("1"))
            .await
            .unwrap();
        assert!(reply.contains("gojek"));
    }

    #[tokio::test]
    async fn test_download_writes_file_and_links_it() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();

        let reply = interpreter
            .handle_message(&group_message("download pengeluaran"))
            .await
            .unwrap();
        assert!(reply.contains("http://localhost:1234/download/Pengeluaran_"));

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_aggregates_all_time_expenses() {
        let dir = tempfile::tempdir().unwrap();
        let interpreter = test_interpreter(dir.path().to_path_buf());
        interpreter
            .handle_message(&group_message("makan 10rb"))
            .await
            .unwrap();
        interpreter
            .handle_message(&group_message("minum 5rb"))
            .await
            .unwrap();

        let reply = interpreter
            .handle_message(&group_message("ringkasan"))
            .await
            .unwrap();
        assert!(reply.contains("Ringkasan Pengeluaran"));
        assert!(reply.contains("Makanan: 15.000 IDR (2 transaksi)"));
        assert!(reply.contains("Total Pengeluaran: 15.000 IDR"));
    }
}
