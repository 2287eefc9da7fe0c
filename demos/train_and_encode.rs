use bytebpe::{BPETokenizer, ErrorMode, TrainerConfig, train};

fn main() {
    let corpus = "low low low low low lower lower widest widest widest newest newest newest newest newest newest<|endoftext|>"
        .repeat(4);

    let config = TrainerConfig {
        vocab_size: 270,
        num_chunks: 2,
        ..TrainerConfig::default()
    };

    let output = match train(corpus.as_bytes(), &config) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("training failed: {e}");
            return;
        }
    };

    println!("Learned merges:");
    for rule in &output.merges {
        let left = output.vocabulary.get(rule.pair.0).unwrap_or_default();
        let right = output.vocabulary.get(rule.pair.1).unwrap_or_default();
        println!(
            "  {:>4}: {:?} + {:?}",
            rule.merged,
            String::from_utf8_lossy(left),
            String::from_utf8_lossy(right)
        );
    }

    let tokenizer = match BPETokenizer::try_from(output) {
        Ok(tok) => tok,
        Err(e) => {
            eprintln!("invalid training output: {e}");
            return;
        }
    };

    let text = "the newest lower<|endoftext|>widest";
    let ids = match tokenizer.encode_text(text) {
        Ok(ids) => ids,
        Err(e) => {
            eprintln!("encode failed: {e}");
            return;
        }
    };
    println!("\n{text:?} -> {ids:?}");

    match tokenizer.decode_text(&ids, ErrorMode::Strict) {
        Ok(back) => println!("decoded: {back:?}"),
        Err(e) => eprintln!("decode failed: {e}"),
    }
}
