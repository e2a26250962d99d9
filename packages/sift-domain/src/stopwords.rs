const ENGLISH: &[&str] = &[
	"a", "about", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for",
	"from", "how", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or", "please", "should",
	"so", "that", "the", "their", "there", "these", "this", "to", "was", "we", "what", "when",
	"where", "which", "who", "why", "will", "with", "you", "your",
];

const CHINESE: &[&str] = &[
	"的", "了", "和", "是", "在", "我", "有", "就", "不", "人", "都", "一", "一个", "上", "也",
	"很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "那", "吗",
	"呢", "吧", "啊", "请问", "什么", "怎么", "如何", "哪些", "为什么", "可以", "请", "关于",
	"以及", "或者", "还是", "这个", "那个", "我们", "你们", "他们",
];

/// Case-insensitive membership in the built-in English and Chinese stopword lists.
pub fn is_stopword(token: &str) -> bool {
	let lowered = token.to_lowercase();

	ENGLISH.contains(&lowered.as_str()) || CHINESE.contains(&lowered.as_str())
}
