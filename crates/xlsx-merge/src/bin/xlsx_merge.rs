fn main() -> anyhow::Result<()> {
    xlsx_merge::cli::run()
}
