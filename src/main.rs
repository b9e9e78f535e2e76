fn main() {
    memo_notes_lib::run()
}
